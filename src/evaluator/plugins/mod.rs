pub mod comparison;
pub mod is_null;
pub mod logical;
