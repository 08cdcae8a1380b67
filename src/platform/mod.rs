pub mod btle;
