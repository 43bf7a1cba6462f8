/// HTTP API for DAO governance
///
/// Exposes proposal, vote and execution operations as JSON endpoints. The
/// caller is identified by the `x-user-id` header set by the auth layer in
/// front of this service.
use anyhow::Result;
use hyper::body::HttpBody;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::GovernanceError;
use crate::lifecycle::{AddMember, CreateDao, CreateProposal, ListProposals};
use crate::model::{ProposalId, ProposalStatus, VoteType};
use crate::service::GovernanceService;

/// Header carrying the authenticated caller id
pub const USER_ID_HEADER: &str = "x-user-id";

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Response envelope for every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            message,
            data: None,
        }
    }
}

/// Body of POST /proposals/{id}/votes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    /// FOR, AGAINST or ABSTAIN, any case
    pub vote_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A successful handler result
struct Reply {
    status: StatusCode,
    message: String,
    data: serde_json::Value,
}

impl Reply {
    fn ok<T: Serialize>(message: &str, data: &T) -> Result<Self> {
        Ok(Self {
            status: StatusCode::OK,
            message: message.to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    fn created<T: Serialize>(message: &str, data: &T) -> Result<Self> {
        let mut reply = Self::ok(message, data)?;
        reply.status = StatusCode::CREATED;
        Ok(reply)
    }
}

/// HTTP status for a governance failure
pub fn status_for(err: &GovernanceError) -> StatusCode {
    match err {
        GovernanceError::Unauthorized => StatusCode::UNAUTHORIZED,
        GovernanceError::Forbidden(_) => StatusCode::FORBIDDEN,
        GovernanceError::NotFound(_) => StatusCode::NOT_FOUND,
        GovernanceError::InvalidState(_)
        | GovernanceError::DuplicateVote
        | GovernanceError::HasVotes
        | GovernanceError::Conflict(_) => StatusCode::CONFLICT,
        GovernanceError::VotingNotActive(_)
        | GovernanceError::VotingNotConcluded
        | GovernanceError::ThresholdNotMet { .. }
        | GovernanceError::QuorumNotReached { .. }
        | GovernanceError::Validation(_) => StatusCode::BAD_REQUEST,
        GovernanceError::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
        GovernanceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handle HTTP requests for the governance API
pub async fn handle_request(
    req: Request<Body>,
    service: Arc<GovernanceService>,
) -> Result<Response<Body>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let caller = caller_id(&req);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    debug!("Handling {} {}", method, path);

    let outcome = match (&method, segments.as_slice()) {
        // GET /health
        (&Method::GET, ["health"]) => Reply::ok("OK", &serde_json::json!({ "status": "ok" })),

        // POST /daos - Create a DAO, caller becomes ADMIN
        (&Method::POST, ["daos"]) => handle_create_dao(req, &service, caller.as_deref()).await,

        // POST /daos/{id}/members - Enroll a member
        (&Method::POST, ["daos", dao_id, "members"]) => {
            handle_add_member(req, &service, caller.as_deref(), dao_id).await
        }

        // GET /daos/{id}/proposals?status=&category=&page=&limit=
        (&Method::GET, ["daos", dao_id, "proposals"]) => {
            handle_list_proposals(&query, &service, caller.as_deref(), dao_id)
        }

        // POST /daos/{id}/proposals - Create a proposal
        (&Method::POST, ["daos", dao_id, "proposals"]) => {
            handle_create_proposal(req, &service, caller.as_deref(), dao_id).await
        }

        // GET /proposals/{id}
        (&Method::GET, ["proposals", id]) => parse_id(id).and_then(|id| {
            let view = service.lifecycle.get_proposal(id, caller.as_deref())?;
            Reply::ok("Success", &view)
        }),

        // DELETE /proposals/{id}
        (&Method::DELETE, ["proposals", id]) => parse_id(id).and_then(|id| {
            let deleted = service
                .lifecycle
                .delete_proposal(id, require_caller(caller.as_deref())?)?;
            Reply::ok("Proposal deleted", &serde_json::json!({ "id": deleted }))
        }),

        // POST /proposals/{id}/votes - Cast a vote
        (&Method::POST, ["proposals", id, "votes"]) => {
            handle_cast_vote(req, &service, caller.as_deref(), id).await
        }

        // GET /proposals/{id}/votes
        (&Method::GET, ["proposals", id, "votes"]) => parse_id(id).and_then(|id| {
            let votes = service.lifecycle.list_votes(id)?;
            Reply::ok("Success", &votes)
        }),

        // GET /proposals/{id}/threshold
        (&Method::GET, ["proposals", id, "threshold"]) => parse_id(id).and_then(|id| {
            let check = service.lifecycle.check_threshold(id)?;
            Reply::ok("Success", &check)
        }),

        // POST /proposals/{id}/activate
        (&Method::POST, ["proposals", id, "activate"]) => parse_id(id).and_then(|id| {
            let proposal = service
                .lifecycle
                .activate_proposal(id, require_caller(caller.as_deref())?)?;
            Reply::ok("Proposal activated", &proposal)
        }),

        // POST /proposals/{id}/cancel
        (&Method::POST, ["proposals", id, "cancel"]) => parse_id(id).and_then(|id| {
            let proposal = service
                .lifecycle
                .cancel_proposal(id, require_caller(caller.as_deref())?)?;
            Reply::ok("Proposal cancelled", &proposal)
        }),

        // POST /proposals/{id}/execute
        (&Method::POST, ["proposals", id, "execute"]) => parse_id(id).and_then(|id| {
            let receipt = service
                .lifecycle
                .execute_proposal(id, require_caller(caller.as_deref())?)?;
            Reply::ok(&receipt.message, &receipt)
        }),

        // Not found
        _ => {
            let response = ApiResponse::error("Endpoint not found".to_string());
            return json_response(StatusCode::NOT_FOUND, &response);
        }
    };

    match outcome {
        Ok(reply) => {
            json_response(reply.status, &ApiResponse::success(reply.message, reply.data))
        }
        Err(e) => {
            let proposal_ref = match segments.as_slice() {
                ["proposals", id, ..] => Some(id.to_string()),
                _ => None,
            };
            failure_response(e, &method, &path, caller.as_deref(), proposal_ref.as_deref())
        }
    }
}

async fn handle_create_dao(
    req: Request<Body>,
    service: &GovernanceService,
    caller: Option<&str>,
) -> Result<Reply> {
    let caller = require_caller(caller)?;
    let body: CreateDao = read_json(req).await?;
    let (dao, admin) = service.lifecycle.create_dao(caller, body)?;
    Reply::created("DAO created", &serde_json::json!({ "dao": dao, "admin": admin }))
}

async fn handle_add_member(
    req: Request<Body>,
    service: &GovernanceService,
    caller: Option<&str>,
    dao_id: &str,
) -> Result<Reply> {
    let caller = require_caller(caller)?;
    let dao_id = parse_id(dao_id)?;
    let body: AddMember = read_json(req).await?;
    let member = service.lifecycle.add_member(dao_id, caller, body)?;
    Reply::created("Member added", &member)
}

fn handle_list_proposals(
    query: &str,
    service: &GovernanceService,
    caller: Option<&str>,
    dao_id: &str,
) -> Result<Reply> {
    let dao_id = parse_id(dao_id)?;
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    let status = params
        .get("status")
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<ProposalStatus>())
        .transpose()
        .map_err(GovernanceError::Validation)?;

    let filter = ListProposals {
        status,
        category: params.get("category").cloned(),
        page: parse_optional_number(&params, "page")?,
        limit: parse_optional_number(&params, "limit")?,
    };

    let page = service.lifecycle.list_proposals(dao_id, filter, caller)?;
    Reply::ok("Success", &page)
}

async fn handle_create_proposal(
    req: Request<Body>,
    service: &GovernanceService,
    caller: Option<&str>,
    dao_id: &str,
) -> Result<Reply> {
    let caller = require_caller(caller)?;
    let dao_id = parse_id(dao_id)?;
    let body: CreateProposal = read_json(req).await?;
    let proposal = service.lifecycle.create_proposal(dao_id, caller, body)?;
    Reply::created("Proposal created", &proposal)
}

async fn handle_cast_vote(
    req: Request<Body>,
    service: &GovernanceService,
    caller: Option<&str>,
    proposal_id: &str,
) -> Result<Reply> {
    let caller = require_caller(caller)?;
    let proposal_id = parse_id(proposal_id)?;
    let body: CastVoteRequest = read_json(req).await?;
    let vote_type = body
        .vote_type
        .parse::<VoteType>()
        .map_err(GovernanceError::Validation)?;

    let vote = service
        .votes
        .cast_vote(proposal_id, caller, vote_type, body.reason)?;
    Reply::created("Vote cast", &vote)
}

fn caller_id(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_caller(caller: Option<&str>) -> std::result::Result<&str, GovernanceError> {
    caller.ok_or(GovernanceError::Unauthorized)
}

fn parse_id(raw: &str) -> Result<ProposalId> {
    raw.parse::<ProposalId>()
        .map_err(|_| GovernanceError::validation(format!("invalid id: {}", raw)).into())
}

fn parse_optional_number(params: &HashMap<String, String>, key: &str) -> Result<Option<u32>> {
    match params.get(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| GovernanceError::validation(format!("invalid {}: {}", key, raw)).into()),
        None => Ok(None),
    }
}

/// Read the body chunk by chunk, stopping once it passes `MAX_BODY_BYTES`
async fn read_body_limited(mut body: Body) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();

    while let Some(chunk) = body.data().await {
        let chunk = chunk
            .map_err(|e| GovernanceError::validation(format!("error reading request body: {}", e)))?;
        if bytes.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(GovernanceError::validation(format!(
                "request body exceeds {} bytes",
                MAX_BODY_BYTES
            ))
            .into());
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T> {
    let bytes = read_body_limited(req.into_body()).await?;

    serde_json::from_slice(&bytes)
        .map_err(|e| GovernanceError::validation(format!("malformed request body: {}", e)).into())
}

fn failure_response(
    err: anyhow::Error,
    method: &Method,
    path: &str,
    caller: Option<&str>,
    proposal: Option<&str>,
) -> Result<Response<Body>> {
    let caller = caller.unwrap_or("-");
    let proposal = proposal.unwrap_or("-");

    match err.downcast::<GovernanceError>() {
        Ok(gov) if !gov.is_internal() => {
            debug!(
                "{} {} rejected for caller {}: {} ({})",
                method,
                path,
                caller,
                gov,
                gov.kind()
            );
            json_response(status_for(&gov), &ApiResponse::error(gov.to_string()))
        }
        Ok(gov) => {
            // Log error internally, return generic message
            error!(
                "{} {} failed (caller: {}, proposal: {}): {:?}",
                method, path, caller, proposal, gov
            );
            internal_error_response()
        }
        Err(other) => {
            warn!(
                "{} {} failed (caller: {}, proposal: {}): {:#}",
                method, path, caller, proposal, other
            );
            internal_error_response()
        }
    }
}

fn internal_error_response() -> Result<Response<Body>> {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ApiResponse::error("Internal server error".to_string()),
    )
}

fn json_response(status: StatusCode, response: &ApiResponse) -> Result<Response<Body>> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(response)?))?)
}

/// Run the governance API server
pub async fn run_api_server(addr: SocketAddr, service: Arc<GovernanceService>) -> Result<()> {
    info!("Starting governance API server on {}", addr);

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move {
                    match handle_request(req, service).await {
                        Ok(response) => Ok::<_, Infallible>(response),
                        Err(e) => {
                            error!("Governance API error: {}", e);
                            let mut response = Response::new(Body::from(
                                r#"{"success":false,"message":"Internal server error"}"#,
                            ));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            Ok(response)
                        }
                    }
                }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    server.await?;

    Ok(())
}
