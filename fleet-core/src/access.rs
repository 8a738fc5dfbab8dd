/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::api_error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[doc = "Caller role, as resolved by the identity provider."]
pub enum Role {
    Admin,
    Jefatura,
    Guardia,
    Legajo,
    Graduados,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewFleet,
    CreateUnit,
    EditUnit,
    DeleteUnit,
    RecordRevision,
    DeleteRevision,
    UpdateFuel,
}

impl Role {
    pub fn allows(self, permission: Permission) -> bool {
        match permission {
            Permission::CreateUnit | Permission::DeleteUnit | Permission::DeleteRevision => {
                matches!(self, Self::Admin)
            }
            Permission::EditUnit => matches!(self, Self::Admin | Self::Jefatura),
            Permission::ViewFleet | Permission::RecordRevision | Permission::UpdateFuel => {
                matches!(self, Self::Admin | Self::Jefatura | Self::Guardia)
            }
        }
    }

    pub fn ensure(self, permission: Permission) -> Result<(), ApiError> {
        if self.allows(permission) {
            Ok(())
        } else {
            Err(ApiError::Permission { role: self, permission })
        }
    }
}

impl Display for Role {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(match self {
            Self::Admin => "admin",
            Self::Jefatura => "jefatura",
            Self::Guardia => "guardia",
            Self::Legajo => "legajo",
            Self::Graduados => "graduados",
        })
    }
}

impl Display for Permission {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(match self {
            Self::ViewFleet => "view the fleet",
            Self::CreateUnit => "create units",
            Self::EditUnit => "edit units",
            Self::DeleteUnit => "delete units",
            Self::RecordRevision => "record revisions",
            Self::DeleteRevision => "delete revisions",
            Self::UpdateFuel => "update fuel levels",
        })
    }
}
