//! The association controller: connects a Kibana instance to the
//! Elasticsearch cluster backing it.
pub mod ca;
pub mod controller;
pub mod credentials;
pub mod gc;
