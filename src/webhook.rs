use crate::evaluator::{EvaluateError, Outcome, SpeedEvaluator};
use crate::types::{DetectionEvent, NewDetection};
use bytes::Bytes;
use log::{error, info};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use url::form_urlencoded;
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::reply::{self, Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const WELCOME: &str = "Welcome to the Kamerafyr server!";
const EXPIRED: &str = "previous license plate sighting expired";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Form body posted by the cameras. Missing fields read as empty and the
/// first value of a repeated field wins.
#[derive(Debug, Default, PartialEq)]
struct PlateForm {
    plate: String,
    timestamp: String,
    hostname: String,
}

#[derive(Debug)]
struct InvalidForm(String);

impl warp::reject::Reject for InvalidForm {}

pub async fn run(evaluator: Arc<SpeedEvaluator>, port: u16) {
    info!("Starting server on port {}", port);
    warp::serve(routes(evaluator)).run(([0, 0, 0, 0], port)).await;
}

pub fn routes(
    evaluator: Arc<SpeedEvaluator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    // Every GET path gets the welcome, not just `/`.
    let index = warp::get()
        .and(warp::path::full())
        .and(warp::addr::remote())
        .map(|path: FullPath, remote: Option<SocketAddr>| {
            log_request("GET", path.as_str(), remote);
            respond(StatusCode::OK, json!({ "message": WELCOME }))
        });

    let plate = warp::path!("licenseplate")
        .and(warp::post())
        .and(warp::addr::remote())
        .map(|remote: Option<SocketAddr>| log_request("POST", "/licenseplate", remote))
        .untuple_one()
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::bytes())
        .and_then(|content_type: Option<String>, body: Bytes| async move {
            parse_form(content_type.as_deref(), &body)
                .map_err(|e| warp::reject::custom(InvalidForm(e)))
        })
        .and(warp::any().map(move || evaluator.clone()))
        .and_then(handle_plate);

    index.or(plate).recover(handle_rejection)
}

/// True when every `%` is followed by two hex digits.
fn valid_escapes(body: &[u8]) -> bool {
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'%' {
            match body.get(i + 1..i + 3) {
                Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

fn parse_form(content_type: Option<&str>, body: &[u8]) -> Result<PlateForm, String> {
    if let Some(ct) = content_type {
        let mime = ct.split(';').next().unwrap_or("").trim();
        if !mime.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
            return Err(format!("unsupported content type {:?}", ct));
        }
    }
    if !valid_escapes(body) {
        return Err("invalid percent escape in body".to_string());
    }

    let mut plate = None;
    let mut timestamp = None;
    let mut hostname = None;
    let mut source = None;
    for (key, value) in form_urlencoded::parse(body) {
        let slot = match &*key {
            "plate" => &mut plate,
            "timestamp" => &mut timestamp,
            "hostname" => &mut hostname,
            "source" => &mut source,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    Ok(PlateForm {
        plate: plate.unwrap_or_default(),
        timestamp: timestamp.unwrap_or_default(),
        hostname: hostname.or(source).unwrap_or_default(),
    })
}

fn log_request(method: &str, path: &str, remote: Option<SocketAddr>) {
    info!(
        "Received request {} {} from {}",
        method,
        path,
        remote.map_or_else(|| "unknown".to_string(), |a| a.to_string())
    );
}

fn respond(status: StatusCode, body: serde_json::Value) -> WithStatus<Json> {
    reply::with_status(reply::json(&body), status)
}

fn echo(event: &DetectionEvent) -> serde_json::Value {
    json!({
        "plate": event.plate,
        "timestamp": event.timestamp,
        "hostname": event.source,
    })
}

async fn handle_plate(
    form: PlateForm,
    evaluator: Arc<SpeedEvaluator>,
) -> Result<WithStatus<Json>, Rejection> {
    info!(
        "Received license plate {} at {} from {}",
        form.plate, form.timestamp, form.hostname
    );
    let candidate = NewDetection {
        plate: form.plate,
        timestamp: form.timestamp,
        source: form.hostname,
    };

    let response = match evaluator.evaluate(candidate).await {
        Ok(Outcome::FirstSighting(stored))
        | Ok(Outcome::StaleReplaced {
            stored: Some(stored),
            ..
        }) => respond(StatusCode::OK, echo(&stored)),
        Ok(Outcome::Duplicate) => respond(
            StatusCode::BAD_REQUEST,
            json!({ "error": "similar license plate already exists" }),
        ),
        Ok(Outcome::StaleReplaced { stored: None, .. }) => respond(
            StatusCode::BAD_REQUEST,
            json!({ "error": EXPIRED }),
        ),
        Ok(Outcome::Speeding { .. }) => respond(
            StatusCode::BAD_REQUEST,
            json!({ "message": "license plate is speeding" }),
        ),
        Ok(Outcome::NotSpeeding { .. }) => respond(
            StatusCode::BAD_REQUEST,
            json!({ "message": "license plate is not speeding" }),
        ),
        Err(EvaluateError::InvalidTimestamp) => respond(
            StatusCode::BAD_REQUEST,
            json!({ "error": "invalid timestamp format" }),
        ),
        Err(e) => {
            error!("Error handling plate: {}", e);
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal server error" }),
            )
        }
    };
    Ok(response)
}

async fn handle_rejection(err: Rejection) -> Result<WithStatus<Json>, Rejection> {
    if let Some(InvalidForm(reason)) = err.find::<InvalidForm>() {
        error!("Could not parse form: {}", reason);
    } else if let Some(e) = err.find::<warp::reject::PayloadTooLarge>() {
        error!("Could not parse form: {}", e);
    } else {
        return Err(err);
    }
    Ok(respond(
        StatusCode::BAD_REQUEST,
        json!({ "error": "could not parse form" }),
    ))
}
