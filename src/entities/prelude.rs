pub use super::api::Entity as Api;
pub use super::dept::Entity as Dept;
pub use super::menu::Entity as Menu;
pub use super::menu_api::Entity as MenuApi;
pub use super::permission::Entity as Permission;
pub use super::role::Entity as Role;
pub use super::role_dept::Entity as RoleDept;
pub use super::role_menu::Entity as RoleMenu;
pub use super::user::Entity as User;
