//! `ddcsync catalog`: the built-in feature catalog. No backend needed.

use tabled::Tabled;

use ddcsync_core::{FeatureDefinition, catalog};

use crate::cli::{CatalogArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct CatalogRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Range")]
    range: String,
}

impl From<&FeatureDefinition> for CatalogRow {
    fn from(d: &FeatureDefinition) -> Self {
        let range = if d.choices.is_empty() {
            d.maximum
                .map_or_else(|| "-".into(), |max| format!("{}..={max}", d.minimum))
        } else {
            d.choices.values().cloned().collect::<Vec<_>>().join(", ")
        };
        Self {
            code: format!("0x{:02X}", d.code),
            name: d.name.clone(),
            category: d.category.to_string(),
            kind: d.kind.to_string(),
            range,
        }
    }
}

pub fn handle(args: &CatalogArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_file_config(global).unwrap_or_default();
    let format = util::output_format(global, &cfg);

    let entries: Vec<FeatureDefinition> = match args.category {
        Some(category) => catalog::features_by_category(category).cloned().collect(),
        None => catalog::iter().cloned().collect(),
    };

    let out = output::render_list(
        format,
        &entries,
        |d| CatalogRow::from(d),
        |d| format!("0x{:02X}", d.code),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
