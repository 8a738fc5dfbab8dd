/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::runtime_error::RuntimeError;
use crate::store::{Collection, Fields, Record};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{from_value, to_value, Value};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[doc = "Fixed vehicle categories."]
pub enum UnitType {
    #[serde(rename = "Ambulancia")]
    Ambulance,
    #[serde(rename = "Unidad de Incendio Estructural")]
    StructuralFire,
    #[serde(rename = "Unidad de Incendio Forestal")]
    ForestFire,
    #[serde(rename = "Unidad de Abastecimiento")]
    WaterSupply,
    #[serde(rename = "Unidad de Rescate Urbano")]
    UrbanRescue,
    #[serde(rename = "Unidad de Transporte de Personal")]
    PersonnelTransport,
    #[serde(rename = "Unidad de Logística")]
    Logistics,
    #[serde(rename = "Escalera Mecánica")]
    AerialLadder,
    #[serde(rename = "Unidad de Rescate Vehicular")]
    VehicleRescue,
    #[serde(rename = "Unidad de Rescate Acuático")]
    WaterRescue,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[doc = "Operational status of a vehicle."]
pub enum UnitStatus {
    #[default]
    #[serde(rename = "Operativa")]
    Operative,
    #[serde(rename = "En Reparación")]
    InRepair,
    #[serde(rename = "Fuera de Servicio")]
    OutOfService,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[doc = "Fuel gauge reading, in quarters of a tank."]
pub enum FuelLevel {
    #[serde(rename = "1/4")]
    Quarter,
    #[serde(rename = "2/4")]
    Half,
    #[serde(rename = "3/4")]
    ThreeQuarters,
    #[serde(rename = "4/4")]
    Full,
}

impl FuelLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quarter => "1/4",
            Self::Half => "2/4",
            Self::ThreeQuarters => "3/4",
            Self::Full => "4/4",
        }
    }
}

impl FromStr for FuelLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1/4" => Ok(Self::Quarter),
            "2/4" => Ok(Self::Half),
            "3/4" => Ok(Self::ThreeQuarters),
            "4/4" => Ok(Self::Full),
            other => Err(format!("unknown fuel level \"{other}\"")),
        }
    }
}

impl Display for FuelLevel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(self.as_str())
    }
}

/// Status of a single inventory item.
///
/// Only the first three values are ever observed during an inspection; anything else found in storage
/// (missing field, legacy spelling, free text) reads as [`ElementStatus::Unknown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ElementStatus {
    Operative,
    Faulty,
    Missing,
    #[default]
    Unknown,
}

impl ElementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operative => "Operativo",
            Self::Faulty => "Con falla",
            Self::Missing => "Faltante",
            Self::Unknown => "Desconocido",
        }
    }

    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "operativo" => Self::Operative,
            "con falla" => Self::Faulty,
            "faltante" => Self::Missing,
            _ => Self::Unknown,
        }
    }

    /// Whether the status can be the outcome of an inspection.
    pub fn is_observed(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_problem(&self) -> bool {
        matches!(self, Self::Faulty | Self::Missing)
    }
}

impl Display for ElementStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(self.as_str())
    }
}

impl Serialize for ElementStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ElementStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?
            .map(|value| Self::parse_lenient(&value))
            .unwrap_or_default())
    }
}

/// Item quantity; some equipment is not counted at all.
///
/// Legacy documents may carry free text typed by hand ("2 tramos"); it is kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawQuantity", into = "RawQuantity")]
pub enum Quantity {
    Count(u32),
    #[default]
    NotApplicable,
    Text(String),
}

const NOT_APPLICABLE: &str = "-";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Count(u32),
    Text(String),
    Other(Value),
}

impl From<RawQuantity> for Quantity {
    fn from(value: RawQuantity) -> Self {
        match value {
            RawQuantity::Count(count) => Self::Count(count),
            RawQuantity::Text(text) if text.trim() == NOT_APPLICABLE || text.trim().is_empty() => Self::NotApplicable,
            RawQuantity::Text(text) => text
                .trim()
                .parse()
                .map_or_else(|_| Self::Text(text.trim().to_string()), Self::Count),
            RawQuantity::Other(Value::Null) => Self::NotApplicable,
            RawQuantity::Other(other) => Self::Text(other.to_string()),
        }
    }
}

impl From<Quantity> for RawQuantity {
    fn from(value: Quantity) -> Self {
        match value {
            Quantity::Count(count) => Self::Count(count),
            Quantity::NotApplicable => Self::Text(NOT_APPLICABLE.into()),
            Quantity::Text(text) => Self::Text(text),
        }
    }
}

mod fuel_reading {
    use super::FuelLevel;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<FuelLevel>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_ref().map_or("", FuelLevel::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<FuelLevel>, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?.and_then(|value| value.parse().ok()))
    }
}

// fixed width, so that stored stamps order as text the same way they order in time
mod fixed_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(deserializer)
    }
}

mod non_empty {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?.filter(|value| !value.trim().is_empty()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[doc = "Vehicle entity."]
pub struct Unit {
    #[doc = "Unit ID."]
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "modelo")]
    pub model: String,
    #[serde(rename = "patente")]
    #[doc = "License plate."]
    pub plate: String,
    #[serde(rename = "tipo")]
    pub unit_type: UnitType,
    #[serde(rename = "estado", default)]
    pub status: UnitStatus,
    #[serde(rename = "kilometraje", default)]
    #[doc = "Free-text odometer reading."]
    pub odometer: String,
    #[serde(rename = "combustible", default, with = "fuel_reading")]
    pub fuel: Option<FuelLevel>,
    #[serde(rename = "fechaControlCombustible", default)]
    #[doc = "Server time of the last fuel check."]
    pub fuel_checked_at: Option<DateTime<Utc>>,
    #[serde(rename = "ultima_revision", default)]
    #[doc = "Server time of the last recorded revision."]
    pub last_revision_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "imagen",
        default,
        deserialize_with = "non_empty::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[doc = "Stored image URL."]
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[doc = "Named compartment within a unit."]
pub struct Location {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "unidad_id")]
    pub unit_id: String,
    #[serde(rename = "orden", default)]
    pub order: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[doc = "Inventory item kept in a location."]
pub struct Element {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "cantidad", default)]
    pub quantity: Quantity,
    #[serde(rename = "estado", default)]
    pub status: ElementStatus,
    #[serde(rename = "unidad_id", default)]
    pub unit_id: String,
    #[serde(rename = "ubicacion_id")]
    pub location_id: String,
    #[serde(rename = "orden", default)]
    pub order: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[doc = "Immutable inspection record."]
pub struct Revision {
    pub id: String,
    #[serde(rename = "unidadId")]
    pub unit_id: String,
    #[serde(rename = "bombero", default)]
    #[doc = "Inspector name(s), free text."]
    pub inspectors: String,
    #[serde(rename = "observaciones", default)]
    pub observations: String,
    #[serde(rename = "fecha", with = "fixed_time")]
    #[doc = "Server-assigned creation time."]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "elementos", default)]
    #[doc = "Observed status of every element inspected during the pass."]
    pub statuses: BTreeMap<String, ElementStatus>,
}

impl Revision {
    /// Elements found faulty or missing during the inspection.
    pub fn problems(&self) -> impl Iterator<Item = (&str, ElementStatus)> + '_ {
        self.statuses
            .iter()
            .filter(|(_, status)| status.is_problem())
            .map(|(element_id, status)| (element_id.as_str(), *status))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationNode {
    pub location: Location,
    pub elements: Vec<Element>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[doc = "Unit with its ordered locations and their ordered elements."]
pub struct UnitAggregate {
    pub unit: Unit,
    pub locations: Vec<LocationNode>,
}

#[derive(Debug)]
pub struct ResultsPage<T, K> {
    pub items: Vec<T>,
    pub last_evaluated_key: Option<K>,
}

pub(crate) fn decode<T: DeserializeOwned>(record: Record) -> Result<T, RuntimeError> {
    let mut fields = record.fields;
    fields.insert("id".into(), Value::String(record.id));
    Ok(from_value(Value::Object(fields))?)
}

/// Decodes every readable record; documents that do not fit the model are logged and left out of the listing.
pub(crate) fn decode_all<T: DeserializeOwned>(collection: Collection, records: Vec<Record>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            decode(record)
                .map_err(|error| warn!(%collection, id = id.as_str(), "skipping unreadable document: {error}"))
                .ok()
        })
        .collect()
}

pub(crate) fn encode<T: Serialize>(entity: &T) -> Result<Fields, RuntimeError> {
    match to_value(entity)? {
        Value::Object(fields) => Ok(fields),
        other => Err(RuntimeError::MalformedDocument(format!("expected an object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{decode, encode, ElementStatus, FuelLevel, Quantity, Revision, Unit, UnitStatus, UnitType};
    use crate::store::Record;
    use chrono::{TimeZone, Utc};
    use serde_json::{from_str, json, to_string, Value};
    use std::collections::BTreeMap;

    fn record(id: &str, fields: Value) -> Record {
        Record {
            id: id.into(),
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn legacy_unit_defaults() {
        let unit: Unit = decode(record(
            "u1",
            json!({
                "nombre": "Unidad 5",
                "modelo": "Iveco",
                "patente": "AB123CD",
                "tipo": "Unidad de Incendio Forestal",
                "combustible": "",
                "ultima_revision": null,
            }),
        ))
        .unwrap();

        assert_eq!("u1", unit.id);
        assert_eq!(UnitType::ForestFire, unit.unit_type);
        assert_eq!(UnitStatus::Operative, unit.status);
        assert_eq!("", unit.odometer);
        assert!(unit.fuel.is_none());
        assert!(unit.fuel_checked_at.is_none());
        assert!(unit.last_revision_at.is_none());
        assert!(unit.image.is_none());
    }

    #[test]
    fn unit_fuel_field_round() {
        let unit: Unit = decode(record(
            "u2",
            json!({
                "nombre": "Unidad 2",
                "modelo": "Ford",
                "patente": "XYZ987",
                "tipo": "Ambulancia",
                "estado": "En Reparación",
                "combustible": "3/4",
                "imagen": "",
            }),
        ))
        .unwrap();
        assert_eq!(Some(FuelLevel::ThreeQuarters), unit.fuel);
        assert_eq!(UnitStatus::InRepair, unit.status);
        assert!(unit.image.is_none());

        let fields = encode(&Unit { fuel: None, ..unit }).unwrap();
        assert_eq!(Some(&json!("")), fields.get("combustible"));
        assert!(!fields.contains_key("imagen"));
    }

    #[test]
    fn unknown_element_status_is_lenient() {
        assert_eq!(ElementStatus::Faulty, from_str::<ElementStatus>("\"CON FALLA\"").unwrap());
        assert_eq!(ElementStatus::Missing, from_str::<ElementStatus>("\" faltante\"").unwrap());
        assert_eq!(ElementStatus::Unknown, from_str::<ElementStatus>("\"roto\"").unwrap());
        assert_eq!(ElementStatus::Unknown, from_str::<ElementStatus>("null").unwrap());
        assert_eq!("\"Con falla\"", to_string(&ElementStatus::Faulty).unwrap());
    }

    #[test]
    fn quantity_sentinel() {
        assert_eq!(Quantity::NotApplicable, from_str::<Quantity>("\"-\"").unwrap());
        assert_eq!(Quantity::Count(3), from_str::<Quantity>("3").unwrap());
        assert_eq!(Quantity::Count(12), from_str::<Quantity>("\"12\"").unwrap());
        assert_eq!(Quantity::Text("2 tramos".into()), from_str::<Quantity>("\" 2 tramos \"").unwrap());
        assert_eq!(Quantity::Text("-2".into()), from_str::<Quantity>("-2").unwrap());
        assert_eq!(Quantity::NotApplicable, from_str::<Quantity>("null").unwrap());
        assert_eq!("\"2 tramos\"", to_string(&Quantity::Text("2 tramos".into())).unwrap());
        assert_eq!("\"-\"", to_string(&Quantity::NotApplicable).unwrap());
        assert_eq!("4", to_string(&Quantity::Count(4)).unwrap());
    }

    #[test]
    fn revision_problems() {
        let revision = Revision {
            id: "r1".into(),
            unit_id: "u1".into(),
            inspectors: "Pérez".into(),
            observations: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            statuses: BTreeMap::from([
                ("e1".to_string(), ElementStatus::Operative),
                ("e2".to_string(), ElementStatus::Missing),
                ("e3".to_string(), ElementStatus::Faulty),
            ]),
        };

        let problems: Vec<_> = revision.problems().collect();
        assert_eq!(vec![("e2", ElementStatus::Missing), ("e3", ElementStatus::Faulty)], problems);

        let fields = encode(&revision).unwrap();
        assert_eq!(Some(&json!("2024-03-01T10:00:00.000000000Z")), fields.get("fecha"));
    }
}
