pub mod api;
pub mod binding;
pub mod data_scope;
pub mod dept;
pub mod materializer;
pub mod menu;
pub mod role;
pub mod user;

pub use api::*;
pub use binding::*;
pub use data_scope::*;
pub use dept::*;
pub use materializer::*;
pub use menu::*;
pub use role::*;
pub use user::*;
