pub mod prelude;

pub mod api;
pub mod dept;
pub mod menu;
pub mod menu_api;
pub mod permission;
pub mod role;
pub mod role_dept;
pub mod role_menu;
pub mod user;
