//! Foundation utilities shared by the backend and its host applications

pub mod logging;
