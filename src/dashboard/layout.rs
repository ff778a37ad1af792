use crate::dashboard::config::{LayoutDocument, PlacementEntry, WidgetInstance};
use crate::dashboard::widgets::{GridSize, WidgetRegistry};
use std::collections::HashSet;

/// Size used for widgets whose type the registry does not know.
pub const PLACEHOLDER_SIZE: GridSize = GridSize {
    w: 2,
    h: 2,
    min_w: 1,
    min_h: 1,
};

fn size_for(registry: &WidgetRegistry, instance: &WidgetInstance) -> GridSize {
    registry
        .resolve(&instance.kind)
        .map(|d| d.default_size)
        .unwrap_or(PLACEHOLDER_SIZE)
}

/// Bottom edge of the lowest placement, i.e. the first free row.
pub fn first_free_row(placements: &[PlacementEntry]) -> u32 {
    placements
        .iter()
        .map(|p| p.y.saturating_add(p.height))
        .max()
        .unwrap_or(0)
}

/// Place `entry` at the grid origin, pushing every existing placement down
/// by the new entry's height so nothing overlaps.
pub fn insert_at_origin(placements: &mut Vec<PlacementEntry>, mut entry: PlacementEntry) {
    let shift = entry.height.max(1);
    for placement in placements.iter_mut() {
        placement.y = placement.y.saturating_add(shift);
    }
    entry.x = 0;
    entry.y = 0;
    placements.push(entry);
}

/// Enforce the placement invariants of a document:
/// at most one placement per instance, no placement without an instance,
/// every visible instance placed, sizes at or above the declared minimums.
pub fn reconcile_placements(doc: &mut LayoutDocument, registry: &WidgetRegistry) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let components = &doc.components;

    doc.grid_placement.retain(|placement| {
        if !components.iter().any(|c| c.id == placement.instance_id) {
            warnings.push(format!(
                "placement for missing widget '{}' dropped",
                placement.instance_id
            ));
            return false;
        }
        if !seen.insert(placement.instance_id.clone()) {
            warnings.push(format!(
                "duplicate placement for widget '{}' dropped",
                placement.instance_id
            ));
            return false;
        }
        true
    });

    for placement in &mut doc.grid_placement {
        let Some(instance) = doc.components.iter().find(|c| c.id == placement.instance_id) else {
            continue;
        };
        clamp_to_minimums(placement, size_for(registry, instance));
    }

    let missing: Vec<(String, GridSize)> = doc
        .components
        .iter()
        .filter(|c| c.visible && !seen.contains(&c.id))
        .map(|c| (c.id.clone(), size_for(registry, c)))
        .collect();
    for (id, size) in missing {
        let y = first_free_row(&doc.grid_placement);
        warnings.push(format!("widget '{id}' had no placement; appended at row {y}"));
        doc.grid_placement
            .push(PlacementEntry::new(id, 0, y, size.w, size.h));
    }

    for w in &warnings {
        tracing::debug!(layout = %doc.id, "{w}");
    }
    warnings
}

/// Raise width/height to the larger of the registry minimum and the
/// entry's own declared minimum.
pub fn clamp_to_minimums(placement: &mut PlacementEntry, size: GridSize) {
    let min_w = placement.min_width.unwrap_or(0).max(size.min_w).max(1);
    let min_h = placement.min_height.unwrap_or(0).max(size.min_h).max(1);
    placement.width = placement.width.max(min_w);
    placement.height = placement.height.max(min_h);
}

/// Visible instances paired with their placement. Instances without a
/// placement and placements without a visible instance are both left out.
pub fn visible_placements(doc: &LayoutDocument) -> Vec<(&WidgetInstance, &PlacementEntry)> {
    doc.visible_instances()
        .filter_map(|instance| doc.placement_for(&instance.id).map(|p| (instance, p)))
        .collect()
}
