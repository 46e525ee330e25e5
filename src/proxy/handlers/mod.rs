// Handlers module - HTTP endpoint handlers

pub mod gateway;
pub mod profile_details;
