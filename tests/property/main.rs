// tests/property/main.rs

mod resolver;
