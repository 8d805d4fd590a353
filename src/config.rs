use rocket::data::{ByteUnit, ToByteUnit};
use rocket::figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "RECORDS_";

/// Upload cap for the term CSV import. The multipart form as a whole gets a
/// little more room than the file itself.
pub fn import_file_limit() -> ByteUnit {
    4.mebibytes()
}

/// Snapshot of the settings a request handler may consult. Extracted once at
/// ignition and handed to handlers through `RequestContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Include error detail in banners and JSON envelopes.
    pub debug: bool,
    pub session_ttl_hours: i64,
    /// Upper bound for a grid page; `length=-1` still means every row.
    pub max_page_length: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            session_ttl_hours: 8,
            max_page_length: 500,
        }
    }
}

impl AppConfig {
    /// Rocket's own figment, with our defaults underneath and `RECORDS_*`
    /// environment variables on top.
    pub fn figment() -> Figment {
        rocket::Config::figment()
            .merge(("limits.file", import_file_limit()))
            .merge(("limits.data-form", import_file_limit() + 1.mebibytes()))
            .join(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).global())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment.extract::<AppConfig>()
    }
}
