//! Value printing (Lisp representation).

use super::intern::resolve_sym;
use super::value::{with_heap, Value};

/// Print a `Value` as a Lisp string.
pub fn print_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::True => "t".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Symbol(id) => resolve_sym(*id).to_owned(),
        Value::Str(id) => {
            let s = with_heap(|h| h.get_string(*id).to_owned());
            format_lisp_string(&s)
        }
        Value::Cons(_) => {
            let mut out = String::from("(");
            print_cons(value, &mut out);
            out.push(')');
            out
        }
        Value::Subr(id) => format!("#<subr {}>", resolve_sym(*id)),
        Value::ModuleFunction(id) => {
            let addr = with_heap(|h| h.get_module_function(*id).subr_address());
            format!("#<module function at 0x{addr:x}>")
        }
        Value::UserPtr(id) => {
            let (ptr, fin) = with_heap(|h| {
                let p = h.get_user_ptr(*id);
                (p.ptr as usize, p.finalizer_address())
            });
            format!("#<user-ptr ptr=0x{ptr:x} finalizer=0x{fin:x}>")
        }
    }
}

fn print_cons(value: &Value, out: &mut String) {
    let mut cursor = *value;
    let mut first = true;
    loop {
        match cursor {
            Value::Cons(id) => {
                let (car, cdr) = with_heap(|h| (h.cons_car(id), h.cons_cdr(id)));
                if !first {
                    out.push(' ');
                }
                out.push_str(&print_value(&car));
                first = false;
                cursor = cdr;
            }
            Value::Nil => return,
            other => {
                out.push_str(" . ");
                out.push_str(&print_value(&other));
                return;
            }
        }
    }
}

fn format_lisp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() {
            "-0.0e+NaN".to_string()
        } else {
            "0.0e+NaN".to_string()
        };
    }
    if f.is_infinite() {
        return if f > 0.0 {
            "1.0e+INF".to_string()
        } else {
            "-1.0e+INF".to_string()
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}
