pub mod common;

mod item_store_tests;
mod source_store_tests;
