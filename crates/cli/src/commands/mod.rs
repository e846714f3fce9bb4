pub mod ctl;
pub mod daemon;
pub mod keyring;
pub mod validate;
