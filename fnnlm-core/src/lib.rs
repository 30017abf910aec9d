pub mod context;
pub mod corpus;
pub mod feed_forward_language_model;
pub mod language_model;
pub mod snapshot;
pub mod trainer;
pub mod util;
pub mod vocabulary;
