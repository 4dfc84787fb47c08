pub mod xliff;
