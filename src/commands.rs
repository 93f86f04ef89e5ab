//! CLI commands and resource-name routing.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use crate::api::{ApiError, LabClient, RequestOptions};
use crate::models::endpoints;

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Show last-known backend reachability and queued work
  Status,
  /// Probe the backend right now and report the result
  Check,
  /// Obtain and store a token pair (password read from HEMOLAB_PASSWORD)
  Login {
    /// Account email
    email: String,
  },
  /// Replay queued mutations now
  Sync,
  /// List mutations waiting for replay
  Pending,
  /// List a resource collection
  List {
    resource: String,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 25)]
    limit: u32,
    /// Serve from the local cache without touching the network
    #[arg(long)]
    offline: bool,
  },
  /// Fetch a single resource by id
  Get { resource: String, id: String },
  /// Create a resource from a JSON payload (inline, or @file)
  Create {
    resource: String,
    data: String,
    /// Queue the mutation without touching the network
    #[arg(long)]
    offline: bool,
  },
  /// Update a resource from a JSON payload (inline, or @file)
  Update {
    resource: String,
    id: String,
    data: String,
    /// Queue the mutation without touching the network
    #[arg(long)]
    offline: bool,
  },
  /// Delete a resource by id
  Delete {
    resource: String,
    id: String,
    /// Queue the mutation without touching the network
    #[arg(long)]
    offline: bool,
  },
}

/// A routable collection name.
#[derive(Debug, Clone)]
pub struct ResourceRoute {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub endpoint: &'static str,
}

/// All routable collections
pub const RESOURCES: &[ResourceRoute] = &[
  ResourceRoute {
    name: "pacientes",
    aliases: &["p", "paciente", "patients"],
    endpoint: endpoints::PACIENTES,
  },
  ResourceRoute {
    name: "medicos",
    aliases: &["m", "medico", "doctors"],
    endpoint: endpoints::MEDICOS,
  },
  ResourceRoute {
    name: "examenes",
    aliases: &["e", "examen", "exams"],
    endpoint: endpoints::EXAMENES,
  },
  ResourceRoute {
    name: "ordenes",
    aliases: &["o", "orden", "orders"],
    endpoint: endpoints::ORDENES,
  },
  ResourceRoute {
    name: "resultados",
    aliases: &["resultado", "results"],
    endpoint: endpoints::RESULTADOS,
  },
  ResourceRoute {
    name: "facturas",
    aliases: &["f", "factura", "invoices"],
    endpoint: endpoints::FACTURAS,
  },
  ResourceRoute {
    name: "donantes",
    aliases: &["d", "donante", "donors"],
    endpoint: endpoints::DONANTES,
  },
  ResourceRoute {
    name: "unidades",
    aliases: &["u", "unidad", "units"],
    endpoint: endpoints::UNIDADES,
  },
  ResourceRoute {
    name: "roles",
    aliases: &["rol"],
    endpoint: endpoints::ROLES,
  },
  ResourceRoute {
    name: "permisos",
    aliases: &["permiso", "permissions"],
    endpoint: endpoints::PERMISOS,
  },
  ResourceRoute {
    name: "notificaciones",
    aliases: &["n", "notificacion", "notifications"],
    endpoint: endpoints::NOTIFICACIONES,
  },
];

/// Resolve a collection name the way a user types it: exact name first,
/// then alias, then unambiguous prefix.
pub fn resolve_resource(input: &str) -> Option<&'static ResourceRoute> {
  let input_lower = input.to_lowercase();

  if let Some(route) = RESOURCES.iter().find(|r| r.name == input_lower) {
    return Some(route);
  }

  if let Some(route) = RESOURCES
    .iter()
    .find(|r| r.aliases.contains(&input_lower.as_str()))
  {
    return Some(route);
  }

  let mut prefix_matches = RESOURCES.iter().filter(|r| r.name.starts_with(&input_lower));
  match (prefix_matches.next(), prefix_matches.next()) {
    (Some(route), None) => Some(route),
    _ => None,
  }
}

/// Execute a CLI command against the client.
pub async fn run(command: Command, client: &LabClient) -> Result<()> {
  match command {
    Command::Status => {
      let snapshot = client.health().snapshot();
      println!(
        "Backend: {}",
        if snapshot.healthy {
          "reachable"
        } else {
          "unreachable"
        }
      );
      if let Some(latency) = snapshot.latency {
        println!("Latency: {} ms", latency.as_millis());
      }
      if let Some(checked_at) = snapshot.checked_at {
        println!("Checked: {}", checked_at.format("%Y-%m-%d %H:%M:%S UTC"));
      }
      println!("Pending operations: {}", client.pending_operations()?.len());
      Ok(())
    }

    Command::Check => {
      if client.force_api_check().await {
        println!("Backend is reachable");
      } else {
        println!("Backend is unreachable; reads will use cached data");
      }
      Ok(())
    }

    Command::Login { email } => {
      let password = std::env::var("HEMOLAB_PASSWORD")
        .map_err(|_| eyre!("Password not found. Set the HEMOLAB_PASSWORD environment variable."))?;
      client
        .auth()
        .login(&email, &password)
        .await
        .map_err(|e| eyre!("Login failed: {}", e))?;
      println!("Logged in as {}", email);
      Ok(())
    }

    Command::Sync => {
      if !client.force_api_check().await {
        println!("Backend is unreachable; queued operations were left untouched");
        return Ok(());
      }

      let report = client.sync_pending().await?;
      println!(
        "Replayed {} operation(s), {} rejected and kept for review",
        report.replayed, report.skipped
      );
      if report.stopped_at.is_some() {
        println!("Replay stopped early; run sync again once the backend recovers");
      }
      Ok(())
    }

    Command::Pending => {
      let operations = client.pending_operations()?;
      if operations.is_empty() {
        println!("No pending operations");
        return Ok(());
      }

      for op in operations {
        let error = op
          .last_error
          .map(|e| format!(" last error: {}", e))
          .unwrap_or_default();
        println!(
          "#{} {} {} queued {}{}",
          op.id,
          op.kind,
          op.endpoint,
          op.queued_at.format("%Y-%m-%d %H:%M:%S UTC"),
          error
        );
      }
      Ok(())
    }

    Command::List {
      resource,
      page,
      limit,
      offline,
    } => {
      let route = route_for(&resource)?;
      let endpoint = format!("{}?page={}&limit={}", route.endpoint, page, limit);
      let options = options_for(offline);

      if !offline {
        client.force_api_check().await;
      }

      let response = client.get(&endpoint, &options).await.map_err(readable)?;
      print_json(&response.into_annotated())
    }

    Command::Get { resource, id } => {
      let route = route_for(&resource)?;
      let endpoint = format!("{}{}/", route.endpoint, id);
      client.force_api_check().await;

      let response = client
        .get(&endpoint, &RequestOptions::default())
        .await
        .map_err(readable)?;
      print_json(&response.into_annotated())
    }

    Command::Create {
      resource,
      data,
      offline,
    } => {
      let route = route_for(&resource)?;
      let payload = read_payload(&data)?;
      let options = options_for(offline);

      if !offline {
        client.force_api_check().await;
      }

      let response = client
        .post(route.endpoint, &payload, &options)
        .await
        .map_err(readable)?;
      print_json(&response.into_annotated())
    }

    Command::Update {
      resource,
      id,
      data,
      offline,
    } => {
      let route = route_for(&resource)?;
      let endpoint = format!("{}{}/", route.endpoint, id);
      let payload = read_payload(&data)?;
      let options = options_for(offline);

      if !offline {
        client.force_api_check().await;
      }

      let response = client
        .put(&endpoint, &payload, &options)
        .await
        .map_err(readable)?;
      print_json(&response.into_annotated())
    }

    Command::Delete {
      resource,
      id,
      offline,
    } => {
      let route = route_for(&resource)?;
      let endpoint = format!("{}{}/", route.endpoint, id);
      let options = options_for(offline);

      if !offline {
        client.force_api_check().await;
      }

      let response = client.delete(&endpoint, &options).await.map_err(readable)?;
      print_json(&response.into_annotated())
    }
  }
}

fn route_for(resource: &str) -> Result<&'static ResourceRoute> {
  resolve_resource(resource).ok_or_else(|| {
    let known: Vec<&str> = RESOURCES.iter().map(|r| r.name).collect();
    eyre!(
      "Unknown resource '{}'. Known resources: {}",
      resource,
      known.join(", ")
    )
  })
}

fn options_for(offline: bool) -> RequestOptions {
  if offline {
    RequestOptions::offline()
  } else {
    RequestOptions::default()
  }
}

/// Inline JSON, or @path to read it from a file.
fn read_payload(data: &str) -> Result<Value> {
  let raw = match data.strip_prefix('@') {
    Some(path) => std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read payload file {}: {}", path, e))?,
    None => data.to_string(),
  };

  serde_json::from_str(&raw).map_err(|e| eyre!("Invalid JSON payload: {}", e))
}

fn readable(err: ApiError) -> color_eyre::Report {
  eyre!("{}", err)
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
