pub(crate) mod assessments;
pub(crate) mod attempts;
pub(crate) mod instances;
pub(crate) mod journey;
pub(crate) mod programs;
pub(crate) mod users;
