pub mod fixtures;

mod hybrid_test;
