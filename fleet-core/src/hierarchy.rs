/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::access::{Permission, Role};
use crate::api_error::ApiError;
use crate::blob_store::{BlobStore, Progress};
use crate::model::{
    decode, decode_all, encode, Element, ElementStatus, Location, LocationNode, Quantity, Unit, UnitAggregate,
    UnitStatus, UnitType,
};
use crate::runtime_error::RuntimeError;
use crate::store::{new_document_id, Collection, DocumentStore, Fields};
use crate::subscription::Subscription;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use serde_json::{to_value, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[doc = "Level of the tree whose sibling order is edited."]
pub enum SiblingLevel {
    Location,
    Element,
}

impl SiblingLevel {
    fn collection(self) -> Collection {
        match self {
            Self::Location => Collection::Locations,
            Self::Element => Collection::Elements,
        }
    }

    fn parent_field(self) -> &'static str {
        match self {
            Self::Location => "unidad_id",
            Self::Element => "ubicacion_id",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUnit {
    pub name: String,
    pub model: String,
    pub plate: String,
    pub unit_type: UnitType,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub odometer: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[doc = "Unit attributes to overwrite; absent fields are left untouched."]
pub struct UnitPatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub plate: Option<String>,
    pub unit_type: Option<UnitType>,
    pub status: Option<UnitStatus>,
    pub odometer: Option<String>,
}

/// Location as submitted by a bulk editor; entries without `id` are new.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub elements: Vec<ElementDraft>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub quantity: Quantity,
    #[serde(default)]
    pub status: Option<ElementStatus>,
}

#[derive(Deserialize)]
struct SiblingSlot {
    id: String,
    #[serde(rename = "orden", default)]
    order: u32,
}

fn validate_name(label: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ApiError::validation(format!("{label} must not be empty")))
    } else {
        Ok(value.to_string())
    }
}

pub(crate) fn field(name: &str, value: impl Serialize) -> Result<(String, Value), RuntimeError> {
    Ok((name.to_string(), to_value(value)?))
}

fn order_field(index: usize) -> Fields {
    Fields::from_iter([("orden".to_string(), Value::from(index))])
}

pub(crate) async fn fetch_unit(store: &dyn DocumentStore, unit_id: &str) -> Result<Option<Unit>, ApiError> {
    Ok(store.get(Collection::Units, unit_id).await?.map(decode).transpose()?)
}

pub(crate) async fn load_units(store: &dyn DocumentStore) -> Result<Vec<Unit>, ApiError> {
    let mut units: Vec<Unit> = decode_all(Collection::Units, store.list(Collection::Units).await?);
    units.sort_by(|left, right| left.name.cmp(&right.name).then_with(|| left.id.cmp(&right.id)));
    Ok(units)
}

pub(crate) async fn load_locations(store: &dyn DocumentStore, unit_id: &str) -> Result<Vec<Location>, ApiError> {
    let mut locations: Vec<Location> = decode_all(
        Collection::Locations,
        store
            .query(Collection::Locations, "unidad_id", &Value::from(unit_id))
            .await?,
    );
    locations.sort_by(|left, right| left.order.cmp(&right.order).then_with(|| left.id.cmp(&right.id)));
    Ok(locations)
}

pub(crate) async fn load_elements(store: &dyn DocumentStore, location_id: &str) -> Result<Vec<Element>, ApiError> {
    let mut elements: Vec<Element> = decode_all(
        Collection::Elements,
        store
            .query(Collection::Elements, "ubicacion_id", &Value::from(location_id))
            .await?,
    );
    elements.sort_by(|left, right| left.order.cmp(&right.order).then_with(|| left.id.cmp(&right.id)));
    Ok(elements)
}

pub(crate) async fn load_tree(store: &dyn DocumentStore, unit_id: &str) -> Result<Vec<LocationNode>, ApiError> {
    let locations = load_locations(store, unit_id).await?;
    let elements = try_join_all(locations.iter().map(|location| load_elements(store, &location.id))).await?;

    Ok(locations
        .into_iter()
        .zip(elements)
        .map(|(location, elements)| LocationNode { location, elements })
        .collect())
}

/**
Owner of the unit → location → element tree.

Sibling `order` values stay dense (`0..n`) after every successful mutation: moves, removals and bulk saves all rewrite
the orders of the affected sibling group to their positions, touching only the documents whose value changes.
 */
pub struct HierarchyManager {
    store: Arc<dyn DocumentStore>,
}

impl HierarchyManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_unit(&self, role: Role, unit: NewUnit) -> Result<String, ApiError> {
        role.ensure(Permission::CreateUnit)?;

        let unit = Unit {
            id: new_document_id(),
            name: validate_name("unit name", &unit.name)?,
            model: validate_name("unit model", &unit.model)?,
            plate: validate_name("unit plate", &unit.plate)?,
            unit_type: unit.unit_type,
            status: unit.status,
            odometer: unit.odometer,
            fuel: None,
            fuel_checked_at: None,
            last_revision_at: None,
            image: None,
        };
        self.store.put(Collection::Units, &unit.id, encode(&unit)?).await?;

        info!(unit_id = unit.id.as_str(), "unit created");
        Ok(unit.id)
    }

    pub async fn load_unit(&self, role: Role, unit_id: &str) -> Result<UnitAggregate, ApiError> {
        role.ensure(Permission::ViewFleet)?;

        let unit = fetch_unit(self.store.as_ref(), unit_id)
            .await?
            .ok_or_else(|| ApiError::not_found(Collection::Units, unit_id))?;
        let locations = load_tree(self.store.as_ref(), unit_id).await?;

        Ok(UnitAggregate { unit, locations })
    }

    pub async fn list_units(&self, role: Role, unit_type: Option<UnitType>) -> Result<Vec<Unit>, ApiError> {
        role.ensure(Permission::ViewFleet)?;

        Ok(load_units(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|unit| unit_type.map_or(true, |unit_type| unit.unit_type == unit_type))
            .collect())
    }

    /// Delivers the sorted unit list now and after every change. Must be called within a Tokio runtime.
    pub fn watch_units<L>(&self, role: Role, listener: L) -> Result<Subscription, ApiError>
    where
        L: Fn(Vec<Unit>) + Send + 'static,
    {
        role.ensure(Permission::ViewFleet)?;

        Ok(Subscription::watch(
            Arc::clone(&self.store),
            Collection::Units,
            |store| async move { load_units(store.as_ref()).await },
            listener,
        )?)
    }

    pub async fn update_unit(&self, role: Role, unit_id: &str, patch: UnitPatch) -> Result<(), ApiError> {
        role.ensure(Permission::EditUnit)?;

        let mut fields = Fields::new();
        if let Some(name) = patch.name {
            fields.insert("nombre".into(), Value::from(validate_name("unit name", &name)?));
        }
        if let Some(model) = patch.model {
            fields.insert("modelo".into(), Value::from(validate_name("unit model", &model)?));
        }
        if let Some(plate) = patch.plate {
            fields.insert("patente".into(), Value::from(validate_name("unit plate", &plate)?));
        }
        fields.extend(
            [
                patch.unit_type.map(|value| field("tipo", value)),
                patch.status.map(|value| field("estado", value)),
                patch.odometer.map(|value| field("kilometraje", value)),
            ]
            .into_iter()
            .flatten()
            .collect::<Result<Vec<_>, _>>()?,
        );

        self.patch(Collection::Units, unit_id, fields).await?;
        info!(unit_id, "unit updated");
        Ok(())
    }

    /// Deletes the unit with all its locations and elements; revisions mentioning it are kept.
    pub async fn delete_unit(&self, role: Role, unit_id: &str) -> Result<(), ApiError> {
        role.ensure(Permission::DeleteUnit)?;

        if fetch_unit(self.store.as_ref(), unit_id).await?.is_none() {
            return Err(ApiError::not_found(Collection::Units, unit_id));
        }
        let tree = load_tree(self.store.as_ref(), unit_id).await?;

        try_join_all(
            tree.iter()
                .flat_map(|node| node.elements.iter())
                .map(|element| self.store.delete(Collection::Elements, &element.id)),
        )
        .await?;
        try_join_all(
            tree.iter()
                .map(|node| self.store.delete(Collection::Locations, &node.location.id)),
        )
        .await?;
        self.store.delete(Collection::Units, unit_id).await?;

        info!(unit_id, locations = tree.len(), "unit deleted");
        Ok(())
    }

    pub async fn add_location(&self, role: Role, unit_id: &str, name: &str) -> Result<Location, ApiError> {
        role.ensure(Permission::EditUnit)?;
        let name = validate_name("location name", name)?;

        if fetch_unit(self.store.as_ref(), unit_id).await?.is_none() {
            return Err(ApiError::validation(format!("unit {unit_id} does not exist")));
        }
        let order = load_locations(self.store.as_ref(), unit_id).await?.len() as u32;

        let location = Location {
            id: new_document_id(),
            name,
            unit_id: unit_id.to_string(),
            order,
        };
        self.store
            .put(Collection::Locations, &location.id, encode(&location)?)
            .await?;

        info!(unit_id, location_id = location.id.as_str(), order, "location added");
        Ok(location)
    }

    pub async fn add_element(
        &self,
        role: Role,
        location_id: &str,
        name: &str,
        quantity: Quantity,
    ) -> Result<Element, ApiError> {
        role.ensure(Permission::EditUnit)?;
        let name = validate_name("element name", name)?;

        let location: Location = self
            .store
            .get(Collection::Locations, location_id)
            .await?
            .map(decode)
            .transpose()?
            .ok_or_else(|| ApiError::not_found(Collection::Locations, location_id))?;
        let order = load_elements(self.store.as_ref(), location_id).await?.len() as u32;

        let element = Element {
            id: new_document_id(),
            name,
            quantity,
            status: ElementStatus::Unknown,
            unit_id: location.unit_id,
            location_id: location.id,
            order,
        };
        self.store
            .put(Collection::Elements, &element.id, encode(&element)?)
            .await?;

        info!(location_id, element_id = element.id.as_str(), order, "element added");
        Ok(element)
    }

    pub async fn rename_location(&self, role: Role, location_id: &str, name: &str) -> Result<(), ApiError> {
        role.ensure(Permission::EditUnit)?;
        let name = validate_name("location name", name)?;

        self.patch(
            Collection::Locations,
            location_id,
            Fields::from_iter([("nombre".to_string(), Value::from(name))]),
        )
        .await
    }

    pub async fn update_element(
        &self,
        role: Role,
        element_id: &str,
        name: &str,
        quantity: Quantity,
    ) -> Result<(), ApiError> {
        role.ensure(Permission::EditUnit)?;
        let name = validate_name("element name", name)?;

        self.patch(
            Collection::Elements,
            element_id,
            Fields::from_iter([field("nombre", name)?, field("cantidad", quantity)?]),
        )
        .await
    }

    /// Direct administrative override of an element status, outside of any revision.
    pub async fn set_element_status(&self, role: Role, element_id: &str, status: ElementStatus) -> Result<(), ApiError> {
        role.ensure(Permission::EditUnit)?;

        self.patch(
            Collection::Elements,
            element_id,
            Fields::from_iter([field("estado", status)?]),
        )
        .await
    }

    /// Moves the item one slot up or down among its siblings. Returns `false` when it already sits at the boundary.
    pub async fn move_sibling(
        &self,
        role: Role,
        level: SiblingLevel,
        id: &str,
        direction: Direction,
    ) -> Result<bool, ApiError> {
        role.ensure(Permission::EditUnit)?;

        let mut slots = self.sibling_slots(level, id).await?;
        let position = slots
            .iter()
            .position(|slot| slot.id == id)
            .ok_or_else(|| ApiError::not_found(level.collection(), id))?;
        let neighbour = match direction {
            Direction::Up => position.checked_sub(1),
            Direction::Down => Some(position + 1).filter(|next| *next < slots.len()),
        };
        let Some(neighbour) = neighbour else {
            debug!(id, ?direction, "already at the boundary");
            return Ok(false);
        };

        slots.swap(position, neighbour);
        self.renumber(level.collection(), &slots).await?;

        info!(id, ?direction, position = neighbour, "sibling moved");
        Ok(true)
    }

    /// Deletes a location (with its elements) or an element and closes the gap in its sibling order.
    pub async fn remove_sibling(&self, role: Role, level: SiblingLevel, id: &str) -> Result<(), ApiError> {
        role.ensure(Permission::EditUnit)?;

        let slots = self.sibling_slots(level, id).await?;
        if level == SiblingLevel::Location {
            let elements = load_elements(self.store.as_ref(), id).await?;
            try_join_all(
                elements
                    .iter()
                    .map(|element| self.store.delete(Collection::Elements, &element.id)),
            )
            .await?;
        }
        self.store.delete(level.collection(), id).await?;

        let remaining: Vec<_> = slots.into_iter().filter(|slot| slot.id != id).collect();
        self.renumber(level.collection(), &remaining).await?;

        info!(id, ?level, "sibling removed");
        Ok(())
    }

    /**
    Persists the full location/element layout of a unit as edited in bulk.

    Every entry gets its list position as `order`. Entries with an ID overwrite the stored document, entries without
    one are created. Stored locations and elements of the unit missing from the layout are deleted; an element that
    moved to another location is kept. An element submitted without status keeps its stored one.
     */
    pub async fn save_unit(
        &self,
        role: Role,
        unit_id: &str,
        layout: Vec<LocationDraft>,
    ) -> Result<UnitAggregate, ApiError> {
        role.ensure(Permission::EditUnit)?;

        for location in &layout {
            validate_name("location name", &location.name)?;
            for element in &location.elements {
                validate_name("element name", &element.name)?;
            }
        }

        let unit = fetch_unit(self.store.as_ref(), unit_id)
            .await?
            .ok_or_else(|| ApiError::not_found(Collection::Units, unit_id))?;
        let stored = load_tree(self.store.as_ref(), unit_id).await?;
        let stored_locations: HashSet<&str> = stored.iter().map(|node| node.location.id.as_str()).collect();
        let stored_elements: HashMap<&str, &Element> = stored
            .iter()
            .flat_map(|node| node.elements.iter())
            .map(|element| (element.id.as_str(), element))
            .collect();

        {
            let mut seen_locations = HashSet::new();
            let mut seen_elements = HashSet::new();
            for location in &layout {
                if let Some(id) = &location.id {
                    if !stored_locations.contains(id.as_str()) {
                        return Err(ApiError::validation(format!(
                            "location {id} does not belong to unit {unit_id}"
                        )));
                    }
                    if !seen_locations.insert(id.as_str()) {
                        return Err(ApiError::validation(format!("location {id} submitted twice")));
                    }
                }
                for element in location.elements.iter().filter_map(|element| element.id.as_ref()) {
                    if !stored_elements.contains_key(element.as_str()) {
                        return Err(ApiError::validation(format!(
                            "element {element} does not belong to unit {unit_id}"
                        )));
                    }
                    if !seen_elements.insert(element.as_str()) {
                        return Err(ApiError::validation(format!("element {element} submitted twice")));
                    }
                }
            }
        }

        let mut writes = vec![];
        let mut kept_locations = HashSet::new();
        let mut kept_elements = HashSet::new();
        for (location_index, draft) in layout.into_iter().enumerate() {
            let location_id = draft.id.unwrap_or_else(new_document_id);

            for (element_index, element) in draft.elements.into_iter().enumerate() {
                let element_id = element.id.unwrap_or_else(new_document_id);
                let status = element
                    .status
                    .or_else(|| stored_elements.get(element_id.as_str()).map(|stored| stored.status))
                    .unwrap_or_default();

                let element = Element {
                    id: element_id,
                    name: element.name.trim().to_string(),
                    quantity: element.quantity,
                    status,
                    unit_id: unit.id.clone(),
                    location_id: location_id.clone(),
                    order: element_index as u32,
                };
                writes.push((Collection::Elements, element.id.clone(), encode(&element)?));
                kept_elements.insert(element.id);
            }

            let location = Location {
                id: location_id,
                name: draft.name.trim().to_string(),
                unit_id: unit.id.clone(),
                order: location_index as u32,
            };
            writes.push((Collection::Locations, location.id.clone(), encode(&location)?));
            kept_locations.insert(location.id);
        }

        try_join_all(
            writes
                .into_iter()
                .map(|(collection, id, fields)| async move { self.store.put(collection, &id, fields).await }),
        )
        .await?;

        let removed_elements: Vec<&str> = stored_elements
            .keys()
            .filter(|id| !kept_elements.contains(**id))
            .copied()
            .collect();
        let removed_locations: Vec<&str> = stored_locations
            .iter()
            .filter(|id| !kept_locations.contains(**id))
            .copied()
            .collect();
        try_join_all(
            removed_elements
                .iter()
                .map(|id| self.store.delete(Collection::Elements, id)),
        )
        .await?;
        try_join_all(
            removed_locations
                .iter()
                .map(|id| self.store.delete(Collection::Locations, id)),
        )
        .await?;

        info!(
            unit_id,
            locations = kept_locations.len(),
            elements = kept_elements.len(),
            removed_locations = removed_locations.len(),
            removed_elements = removed_elements.len(),
            "unit layout saved"
        );

        let locations = load_tree(self.store.as_ref(), unit_id).await?;
        Ok(UnitAggregate { unit, locations })
    }

    /// Uploads a unit picture through the blob store and stores its URL on the unit.
    pub async fn attach_image(
        &self,
        role: Role,
        unit_id: &str,
        file_name: &str,
        content: Vec<u8>,
        blobs: &dyn BlobStore,
        progress: Progress<'_>,
    ) -> Result<String, ApiError> {
        role.ensure(Permission::EditUnit)?;
        let file_name = validate_name("file name", file_name)?;

        if fetch_unit(self.store.as_ref(), unit_id).await?.is_none() {
            return Err(ApiError::not_found(Collection::Units, unit_id));
        }

        let url = blobs
            .upload(&format!("{}/{unit_id}/{file_name}", Collection::Units), content, progress)
            .await?;
        self.patch(
            Collection::Units,
            unit_id,
            Fields::from_iter([("imagen".to_string(), Value::from(url.as_str()))]),
        )
        .await?;

        info!(unit_id, url = url.as_str(), "unit image attached");
        Ok(url)
    }

    async fn patch(&self, collection: Collection, id: &str, fields: Fields) -> Result<(), ApiError> {
        if self.store.update(collection, id, fields).await? {
            Ok(())
        } else {
            Err(ApiError::not_found(collection, id))
        }
    }

    async fn sibling_slots(&self, level: SiblingLevel, id: &str) -> Result<Vec<SiblingSlot>, ApiError> {
        let collection = level.collection();
        let record = self
            .store
            .get(collection, id)
            .await?
            .ok_or_else(|| ApiError::not_found(collection, id))?;
        let parent = match level {
            SiblingLevel::Location => decode::<Location>(record)?.unit_id,
            SiblingLevel::Element => decode::<Element>(record)?.location_id,
        };

        let mut slots: Vec<SiblingSlot> = decode_all(
            collection,
            self.store
                .query(collection, level.parent_field(), &Value::from(parent))
                .await?,
        );
        slots.sort_by(|left, right| left.order.cmp(&right.order).then_with(|| left.id.cmp(&right.id)));
        Ok(slots)
    }

    /// Writes every slot's position as its order, skipping those already in place. All writes are issued at once.
    async fn renumber(&self, collection: Collection, slots: &[SiblingSlot]) -> Result<(), ApiError> {
        let pending: Vec<_> = slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| slot.order as usize != *index)
            .collect();
        let results = join_all(
            pending
                .iter()
                .map(|(index, slot)| self.store.update(collection, &slot.id, order_field(*index))),
        )
        .await;

        let mut failure = None;
        for ((_, slot), result) in pending.iter().zip(results) {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%collection, id = slot.id.as_str(), "sibling vanished while renumbering");
                    failure.get_or_insert_with(|| ApiError::not_found(collection, &slot.id));
                }
                Err(error) => {
                    warn!(%collection, id = slot.id.as_str(), "failed to renumber sibling: {error}");
                    failure.get_or_insert_with(|| ApiError::from(error));
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }
}
