//! Typed CRUD surface over the resilient client.
//!
//! Wraps the generic JSON verbs with per-collection record types so page
//! code gets schema checking at the boundary instead of passing untyped
//! blobs around.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

use crate::models::{
  endpoints, Donante, Examen, Factura, Listing, Medico, Notificacion, Orden, Paciente, Permiso,
  Resultado, Rol, UnidadSangre,
};

use super::client::LabClient;
use super::error::ApiError;
use super::types::{ApiResponse, DataSource, RequestOptions};

/// Page selector for collection listings.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery {
  pub page: u32,
  pub limit: u32,
}

impl Default for PageQuery {
  fn default() -> Self {
    Self { page: 1, limit: 25 }
  }
}

/// Typed payload plus the provenance of the underlying response.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  pub data: T,
  pub source: DataSource,
  pub stale: bool,
  pub error: Option<String>,
}

impl<T> Fetched<T> {
  /// Anything not confirmed by the backend on this call.
  pub fn is_provisional(&self) -> bool {
    self.source != DataSource::Network
  }
}

/// The backend's collections, typed.
#[derive(Clone)]
pub struct LabApi {
  client: LabClient,
}

impl LabApi {
  pub fn new(client: LabClient) -> Self {
    Self { client }
  }

  pub fn client(&self) -> &LabClient {
    &self.client
  }

  pub fn pacientes(&self) -> Resource<'_, Paciente> {
    Resource::new(&self.client, endpoints::PACIENTES)
  }

  pub fn medicos(&self) -> Resource<'_, Medico> {
    Resource::new(&self.client, endpoints::MEDICOS)
  }

  pub fn examenes(&self) -> Resource<'_, Examen> {
    Resource::new(&self.client, endpoints::EXAMENES)
  }

  pub fn ordenes(&self) -> Resource<'_, Orden> {
    Resource::new(&self.client, endpoints::ORDENES)
  }

  pub fn resultados(&self) -> Resource<'_, Resultado> {
    Resource::new(&self.client, endpoints::RESULTADOS)
  }

  pub fn facturas(&self) -> Resource<'_, Factura> {
    Resource::new(&self.client, endpoints::FACTURAS)
  }

  pub fn donantes(&self) -> Resource<'_, Donante> {
    Resource::new(&self.client, endpoints::DONANTES)
  }

  pub fn unidades(&self) -> Resource<'_, UnidadSangre> {
    Resource::new(&self.client, endpoints::UNIDADES)
  }

  pub fn roles(&self) -> Resource<'_, Rol> {
    Resource::new(&self.client, endpoints::ROLES)
  }

  pub fn permisos(&self) -> Resource<'_, Permiso> {
    Resource::new(&self.client, endpoints::PERMISOS)
  }

  pub fn notificaciones(&self) -> Resource<'_, Notificacion> {
    Resource::new(&self.client, endpoints::NOTIFICACIONES)
  }
}

/// CRUD operations for one collection.
pub struct Resource<'a, T> {
  client: &'a LabClient,
  base: &'static str,
  _marker: PhantomData<T>,
}

impl<'a, T: Serialize + DeserializeOwned> Resource<'a, T> {
  fn new(client: &'a LabClient, base: &'static str) -> Self {
    Self {
      client,
      base,
      _marker: PhantomData,
    }
  }

  pub async fn list(&self, page: &PageQuery) -> Result<Fetched<Listing<T>>, ApiError> {
    let endpoint = format!("{}?page={}&limit={}", self.base, page.page, page.limit);
    let response = self.client.get(&endpoint, &RequestOptions::default()).await?;
    decode(response)
  }

  pub async fn get(&self, id: &str) -> Result<Fetched<T>, ApiError> {
    let endpoint = format!("{}{}/", self.base, id);
    let response = self.client.get(&endpoint, &RequestOptions::default()).await?;
    decode(response)
  }

  pub async fn create(&self, item: &T) -> Result<Fetched<T>, ApiError> {
    let payload = serde_json::to_value(item).map_err(|e| ApiError::Decode(e.to_string()))?;
    let response = self
      .client
      .post(self.base, &payload, &RequestOptions::default())
      .await?;
    decode(response)
  }

  pub async fn update(&self, id: &str, item: &T) -> Result<Fetched<T>, ApiError> {
    let endpoint = format!("{}{}/", self.base, id);
    let payload = serde_json::to_value(item).map_err(|e| ApiError::Decode(e.to_string()))?;
    let response = self
      .client
      .put(&endpoint, &payload, &RequestOptions::default())
      .await?;
    decode(response)
  }

  pub async fn delete(&self, id: &str) -> Result<Fetched<Value>, ApiError> {
    let endpoint = format!("{}{}/", self.base, id);
    let response = self.client.delete(&endpoint, &RequestOptions::default()).await?;
    Ok(Fetched {
      data: response.data,
      source: response.source,
      stale: response.stale,
      error: response.error,
    })
  }
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<Fetched<T>, ApiError> {
  let data = serde_json::from_value(response.data).map_err(|e| ApiError::Decode(e.to_string()))?;
  Ok(Fetched {
    data,
    source: response.source,
    stale: response.stale,
    error: response.error,
  })
}
