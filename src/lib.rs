pub mod aggregate;
pub mod formats;
pub mod index;
pub mod ingest;
pub mod normalize;
pub mod query_ast;
pub mod query_eval;
pub mod query_parser;
pub mod session;
pub mod text_search;
