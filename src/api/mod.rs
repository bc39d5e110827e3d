pub mod central;
pub mod central_event;
pub mod characteristic;
pub mod peripheral;
pub mod service;
pub mod session_event;
