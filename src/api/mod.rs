pub(crate) mod assessments;
pub(crate) mod attempts;
pub(crate) mod auth;
pub(crate) mod errors;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod journey;
pub(crate) mod programs;
pub(crate) mod router;
