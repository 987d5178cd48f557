pub mod product;
pub mod purchase;

pub use product::Entity as Product;
pub use purchase::Entity as Purchase;
