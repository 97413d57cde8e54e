//! Patient tags carried by orders as clinical info.

use std::collections::BTreeSet;

use clinic_common::ehr::NewOrder;
use clinic_common::models::ehr::TagsSettings;
use clinic_common::models::Clinic;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::error::{ClientResultExt, HandlerError};

/// Tag names of the order. Values of the configured codes are split on the
/// separator, when there is one.
pub fn tag_names(order: &NewOrder, settings: &TagsSettings) -> BTreeSet<String> {
    let separator = settings.separator.as_deref().filter(|separator| !separator.is_empty());

    order
        .order
        .clinical_info
        .iter()
        .filter(|info| {
            info.code
                .as_deref()
                .is_some_and(|code| settings.codes.iter().any(|tagged| tagged == code))
        })
        .filter_map(|info| info.value.as_deref())
        .flat_map(|value| match separator {
            Some(separator) => value.split(separator).collect::<Vec<_>>(),
            None => vec![value],
        })
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Ids of the named tags, creating those the clinic does not have yet. Ids
/// are read from the clinic as refetched, as `clinic` may be outdated.
pub async fn resolve_tag_ids(
    context: &AppContext,
    clinic_id: &str,
    clinic: &Clinic,
    names: &BTreeSet<String>,
) -> Result<Vec<String>, HandlerError> {
    for name in names.iter().filter(|name| !clinic.has_tag(name)) {
        match context.clinics.create_patient_tag(clinic_id, name).await {
            Ok(()) => info!(clinic_id, tag = %name, "patient tag created"),
            // Duplicate or invalid names are rejected, the refetch tells which.
            Err(error) if error.status() == Some(StatusCode::BAD_REQUEST) => {
                debug!(clinic_id, tag = %name, "patient tag not created")
            }
            Err(error) => {
                return Err(error).with_context(|| format!("creating tag {name} in clinic {clinic_id}"))
            }
        }
    }

    let clinic = context
        .clinics
        .get_clinic(clinic_id)
        .await
        .with_context(|| format!("refetching clinic {clinic_id}"))?
        .ok_or_else(|| HandlerError::Failed(format!("clinic {clinic_id} disappeared")))?;
    Ok(names.iter().filter_map(|name| clinic.tag_id(name)).map(str::to_owned).collect())
}
