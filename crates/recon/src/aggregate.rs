use std::collections::BTreeMap;

use crate::model::ReconInput;

/// Split mixed records into per-site snapshots, ordered by site id.
///
/// A site exists if any service, segment, or invoice names it.
pub fn group_by_site(input: &ReconInput) -> BTreeMap<String, ReconInput> {
    let mut sites: BTreeMap<String, ReconInput> = BTreeMap::new();

    for service in &input.services {
        sites
            .entry(service.site_id.clone())
            .or_default()
            .services
            .push(service.clone());
    }
    for segment in &input.segments {
        sites
            .entry(segment.site_id.clone())
            .or_default()
            .segments
            .push(segment.clone());
    }
    for invoice in &input.invoices {
        sites
            .entry(invoice.site_id.clone())
            .or_default()
            .invoices
            .push(invoice.clone());
    }

    sites
}
