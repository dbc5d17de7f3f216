#![allow(unused_imports)]

//! Database models, one file per entity, re-exported at `crate::db::models`.

pub mod notification;
pub mod recipient;
pub mod user;

pub use self::notification::*;
pub use self::recipient::*;
pub use self::user::*;
