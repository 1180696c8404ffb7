//! NeoVM core: a minimal Elisp runtime that hosts native dynamic modules.

pub mod elisp;
pub mod gc;
