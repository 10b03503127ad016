//! Product id classification.
//! Fetches the vendor's product-id-to-type lookup table once at startup, best effort.

use log::{info, warn};
use serde::Deserialize;

/// Behavioral category of a device, derived from its product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeCode {
    /// Binary on/off device. Also the fallback for unknown product ids.
    #[default]
    Switch,
    Light,
}

/// Vendor wire value for the switch type code.
pub const TYPE_CODE_SWITCH: &str = "00";
/// Vendor wire value for the light type code.
pub const TYPE_CODE_LIGHT: &str = "01";

impl TypeCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            TYPE_CODE_LIGHT => TypeCode::Light,
            _ => TypeCode::Switch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductModel {
    pub device_product_id: String,
}

/// One lookup entry: a type code and the product ids it covers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductCollection {
    pub device_type_code: String,
    #[serde(default)]
    pub device_model: Vec<ProductModel>,
}

#[derive(Debug, Deserialize)]
struct LookupInfo {
    #[serde(default)]
    list: Vec<ProductCollection>,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    ret: Option<String>,
    info: Option<LookupInfo>,
}

const LOOKUP_URL: &str = "http://api-us.doiting.com/api/device_product/model";

/// Product-id-to-type lookup table.
///
/// An empty table is a valid state: classification then defaults to
/// [`TypeCode::Switch`]. Note this conflates "not a light" with "unknown";
/// new light product ids are misclassified until the table resolves them.
#[derive(Debug, Clone, Default)]
pub struct ProductTable {
    entries: Vec<ProductCollection>,
}

impl ProductTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ProductCollection>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a product id to a type code, defaulting to Switch.
    pub fn classify(&self, pid: &str) -> TypeCode {
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .device_model
                    .iter()
                    .any(|model| model.device_product_id == pid)
            })
            .map(|entry| TypeCode::from_code(&entry.device_type_code))
            .unwrap_or_default()
    }

    /// Fetch the lookup table from the vendor service.
    ///
    /// Best effort: any transport or parse failure is logged and yields an
    /// empty table, which is not a fatal condition.
    pub async fn fetch(lang: &str) -> Self {
        match Self::try_fetch(lang).await {
            Ok(table) => {
                info!("Product type table loaded ({} entries)", table.entries.len());
                table
            }
            Err(e) => {
                warn!("Product type table fetch failed, defaulting to empty: {}", e);
                Self::empty()
            }
        }
    }

    async fn try_fetch(lang: &str) -> reqwest::Result<Self> {
        let body: LookupBody = reqwest::Client::new()
            .get(LOOKUP_URL)
            .query(&[("lang", lang)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Self::from_body(body))
    }

    fn from_body(body: LookupBody) -> Self {
        if body.ret.as_deref() != Some("1") {
            return Self::empty();
        }
        match body.info {
            Some(info) => Self::from_entries(info.list),
            None => Self::empty(),
        }
    }
}
