/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::access::{Permission, Role};
use crate::api_error::ApiError;
use crate::hierarchy::{field, load_units};
use crate::model::{FuelLevel, Unit, UnitType};
use crate::store::{Collection, DocumentStore, Fields};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelReading {
    pub unit_id: String,
    pub unit_name: String,
    pub unit_type: UnitType,
    pub fuel: Option<FuelLevel>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl From<Unit> for FuelReading {
    fn from(unit: Unit) -> Self {
        Self {
            unit_id: unit.id,
            unit_name: unit.name,
            unit_type: unit.unit_type,
            fuel: unit.fuel,
            checked_at: unit.fuel_checked_at,
        }
    }
}

// unit names carry their fleet number ("Unidad 12"); order by it, unnumbered first
fn fleet_number(name: &str) -> u64 {
    name.split(|character: char| !character.is_ascii_digit())
        .find(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Last-value fuel gauge per unit; no history is kept.
pub struct FuelTracker {
    store: Arc<dyn DocumentStore>,
}

impl FuelTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Overwrites the unit's fuel level and stamps it with the store clock. Returns the stamp.
    pub async fn update_fuel(&self, role: Role, unit_id: &str, level: FuelLevel) -> Result<DateTime<Utc>, ApiError> {
        role.ensure(Permission::UpdateFuel)?;

        let checked_at = self.store.server_time().await?;
        let fields = Fields::from_iter([
            field("combustible", level)?,
            field("fechaControlCombustible", checked_at)?,
        ]);

        if !self.store.update(Collection::Units, unit_id, fields).await? {
            return Err(ApiError::not_found(Collection::Units, unit_id));
        }

        info!(unit_id, %level, "fuel level updated");
        Ok(checked_at)
    }

    pub async fn fuel_overview(&self, role: Role) -> Result<Vec<FuelReading>, ApiError> {
        role.ensure(Permission::ViewFleet)?;

        let mut readings: Vec<FuelReading> = load_units(self.store.as_ref())
            .await?
            .into_iter()
            .map(FuelReading::from)
            .collect();
        readings.sort_by(|left, right| {
            fleet_number(&left.unit_name)
                .cmp(&fleet_number(&right.unit_name))
                .then_with(|| left.unit_name.cmp(&right.unit_name))
        });

        Ok(readings)
    }
}
