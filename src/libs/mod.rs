pub mod alphabet;
pub mod bucket;
pub mod calibrate;
pub mod error;
pub mod index;
pub mod kmer;
pub mod matcher;
pub mod seqdb;
