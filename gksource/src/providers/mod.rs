//! Concrete media providers, one module per source family.

pub mod bilibili;
pub mod catbox;
pub mod generic;
pub mod netease;
pub mod soundcloud;
pub mod youtube;
