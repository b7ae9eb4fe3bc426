//! Sea-ORM entities for the lottery tables

pub mod drawn_numbers;
pub mod rounds;
pub mod tickets;

// Re-export entities for convenience
pub use drawn_numbers::Entity as DrawnNumbers;
pub use rounds::Entity as Rounds;
pub use tickets::Entity as Tickets;
