use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::ProgramVersion;
use crate::db::types::ProgramStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct VersionCreate {
    #[validate(length(min = 1, message = "version must not be empty"))]
    pub(crate) version: String,
    pub(crate) graph: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct VersionResponse {
    pub(crate) id: String,
    pub(crate) program_id: String,
    pub(crate) version: String,
    pub(crate) status: ProgramStatus,
    pub(crate) checksum: String,
    pub(crate) graph: serde_json::Value,
    pub(crate) created_at: String,
    pub(crate) published_at: Option<String>,
}

impl VersionResponse {
    pub(crate) fn from_db(version: ProgramVersion) -> Self {
        Self {
            id: version.id,
            program_id: version.program_id,
            version: version.version,
            status: version.status,
            checksum: version.checksum,
            graph: version.graph.0,
            created_at: format_primitive(version.created_at),
            published_at: version.published_at.map(format_primitive),
        }
    }
}
