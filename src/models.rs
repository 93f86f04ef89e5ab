//! Typed payloads for the backend's resource collections.
//!
//! These mirror the wire shapes the backend serves; field names follow the
//! backend's API. Unknown fields, including the offline markers the client
//! adds to provisional data, are ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection endpoints, relative to the API base.
pub mod endpoints {
  pub const PACIENTES: &str = "/pacientes/";
  pub const MEDICOS: &str = "/medicos/";
  pub const EXAMENES: &str = "/examenes/";
  pub const ORDENES: &str = "/ordenes/";
  pub const RESULTADOS: &str = "/resultados/";
  pub const FACTURAS: &str = "/facturas/";
  pub const DONANTES: &str = "/banco_sangre/donantes/";
  pub const UNIDADES: &str = "/banco_sangre/unidades/";
  pub const ROLES: &str = "/roles/";
  pub const PERMISOS: &str = "/permisos/";
  pub const NOTIFICACIONES: &str = "/notificaciones/";
}

/// Object id: numeric once assigned by the backend, a generated string
/// while a create is still waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
  Assigned(i64),
  Local(String),
}

impl ResourceId {
  /// True for ids generated on this machine for not-yet-confirmed creates.
  pub fn is_local(&self) -> bool {
    match self {
      Self::Assigned(_) => false,
      Self::Local(s) => s.starts_with("offline_") || s.starts_with("temp_"),
    }
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Assigned(n) => write!(f, "{}", n),
      Self::Local(s) => f.write_str(s),
    }
  }
}

/// Paged listing envelope used by every collection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
  pub count: u64,
  #[serde(default)]
  pub next: Option<String>,
  #[serde(default)]
  pub previous: Option<String>,
  pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paciente {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub primer_nombre: String,
  pub segundo_nombre: Option<String>,
  pub primer_apellido: String,
  pub segundo_apellido: Option<String>,
  pub documento: Option<String>,
  pub fecha_nacimiento: Option<String>,
  pub genero: Option<String>,
  pub telefono: Option<String>,
  pub correo: Option<String>,
  pub direccion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donante {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub primer_nombre: String,
  pub segundo_nombre: Option<String>,
  pub primer_apellido: String,
  pub segundo_apellido: Option<String>,
  pub documento: Option<String>,
  pub tipo_sangre: Option<String>,
  pub fecha_nacimiento: Option<String>,
  pub telefono: Option<String>,
  pub correo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medico {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub nombres: String,
  pub apellidos: String,
  pub registro_medico: Option<String>,
  pub especialidad: Option<String>,
  pub telefono: Option<String>,
  pub correo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Examen {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub nombre: String,
  pub codigo: Option<String>,
  pub categoria: Option<String>,
  pub precio: Option<f64>,
  pub activo: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orden {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub paciente: Option<ResourceId>,
  pub medico: Option<ResourceId>,
  #[serde(default)]
  pub examenes: Vec<ResourceId>,
  pub estado: Option<String>,
  pub fecha_creacion: Option<String>,
  pub observaciones: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resultado {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub orden: Option<ResourceId>,
  pub examen: Option<ResourceId>,
  pub valor: Option<String>,
  pub unidad: Option<String>,
  pub rango_referencia: Option<String>,
  pub validado: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factura {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub orden: Option<ResourceId>,
  pub paciente: Option<ResourceId>,
  pub total: Option<f64>,
  pub estado: Option<String>,
  pub fecha_emision: Option<String>,
}

/// A unit in the blood-bank inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnidadSangre {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub donante: Option<ResourceId>,
  pub tipo_sangre: String,
  pub componente: Option<String>,
  pub volumen_ml: Option<f64>,
  pub fecha_extraccion: Option<String>,
  pub fecha_vencimiento: Option<String>,
  pub estado: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rol {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub nombre: String,
  #[serde(default)]
  pub permisos: Vec<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permiso {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub codigo: String,
  pub descripcion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notificacion {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<ResourceId>,
  pub titulo: String,
  pub mensaje: Option<String>,
  pub leida: Option<bool>,
  pub fecha: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_listing_deserializes_paged_envelope() {
    let listing: Listing<Donante> = serde_json::from_value(json!({
      "count": 2,
      "next": "/banco_sangre/donantes/?page=2&limit=1",
      "previous": null,
      "results": [
        {
          "id": 7,
          "primer_nombre": "Juan",
          "segundo_nombre": null,
          "primer_apellido": "Pérez",
          "segundo_apellido": null,
          "documento": "900123",
          "tipo_sangre": "O+",
          "fecha_nacimiento": "1990-04-02",
          "telefono": null,
          "correo": null
        }
      ]
    }))
    .unwrap();

    assert_eq!(listing.count, 2);
    assert_eq!(listing.results.len(), 1);
    assert_eq!(listing.results[0].id, Some(ResourceId::Assigned(7)));
    assert_eq!(listing.results[0].tipo_sangre.as_deref(), Some("O+"));
  }

  #[test]
  fn test_local_ids_round_trip_untagged() {
    let unidad: UnidadSangre = serde_json::from_value(json!({
      "id": "offline_3f2a",
      "donante": 12,
      "tipo_sangre": "A-",
      "componente": "plasma",
      "volumen_ml": 250.0,
      "fecha_extraccion": null,
      "fecha_vencimiento": null,
      "estado": "reservada"
    }))
    .unwrap();

    let id = unidad.id.clone().unwrap();
    assert!(id.is_local());
    assert_eq!(id.to_string(), "offline_3f2a");
    assert_eq!(unidad.donante, Some(ResourceId::Assigned(12)));
  }

  #[test]
  fn test_offline_markers_are_ignored_on_decode() {
    let paciente: Paciente = serde_json::from_value(json!({
      "id": "temp_91",
      "primer_nombre": "Ana",
      "segundo_nombre": null,
      "primer_apellido": "Gómez",
      "segundo_apellido": null,
      "documento": null,
      "fecha_nacimiento": null,
      "genero": null,
      "telefono": null,
      "correo": null,
      "direccion": null,
      "_isOffline": true
    }))
    .unwrap();

    assert!(paciente.id.unwrap().is_local());
  }

  #[test]
  fn test_missing_id_is_not_serialized() {
    let permiso = Permiso {
      id: None,
      codigo: "ordenes.validar".to_string(),
      descripcion: None,
    };

    let value = serde_json::to_value(&permiso).unwrap();
    assert!(value.get("id").is_none());
  }
}
