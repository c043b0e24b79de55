use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use civicfix_db::models::{IssueFilter, StatusChange};
use civicfix_gateway::dispatcher::FanoutEvent;
use civicfix_types::api::{
    AdminDashboard, CreateIssueRequest, IssueDetails, IssueListQuery, IssueListResponse,
    MessageResponse, TransitionRequest, UpdateIssueRequest, UserIssuesResponse,
};
use civicfix_types::models::{Identity, Issue, IssueStatus, IssueSummary};

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

const DEFAULT_PER_PAGE: u32 = 10;
const DEFAULT_ADMIN_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;
const DASHBOARD_RECENT: u32 = 10;

// -- Core operations --

/// Report a new issue. Admins and every connected client hear about it once
/// the insert has committed.
pub async fn create_issue(
    state: &AppState,
    owner: &Identity,
    req: CreateIssueRequest,
) -> Result<Issue, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::InvalidInput("title is required"));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::InvalidInput("description is required"));
    }
    if req.category.trim().is_empty() {
        return Err(ApiError::InvalidInput("category is required"));
    }
    // Administrator scope is keyed on district.
    if req.district.as_deref().is_none_or(|d| d.trim().is_empty()) {
        return Err(ApiError::InvalidInput("district is required"));
    }

    let owner_db = owner.clone();
    let (issue, _confirmation) = run_blocking(state, move |db| db.create_issue(&owner_db, &req)).await?;

    info!("{} ({}) reported issue #{}", owner.username, owner.user_id, issue.id);

    state
        .publish(FanoutEvent::NewIssue {
            issue: IssueSummary::from(&issue),
        })
        .await;

    Ok(issue)
}

/// Move an issue to a new status on behalf of a district administrator.
///
/// Re-sending the current status succeeds without writing history, notifying
/// the owner or fanning out, so retried requests are harmless.
pub async fn transition(
    state: &AppState,
    actor: &Identity,
    issue_id: i64,
    new_status: &str,
    comment: Option<String>,
) -> Result<Issue, ApiError> {
    if !actor.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let new_status: IssueStatus = new_status.parse()?;

    let issue = run_blocking(state, move |db| db.get_issue(issue_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    if !actor.administers(issue.district.as_deref()) {
        return Err(ApiError::Forbidden);
    }

    let actor_db = actor.clone();
    let change = run_blocking(state, move |db| {
        db.transition_status(issue_id, &actor_db, new_status, comment.as_deref())
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    match change {
        StatusChange::Unchanged(issue) => Ok(issue),
        StatusChange::Applied {
            issue,
            old_status,
            notification,
            ..
        } => {
            info!(
                "{} moved issue #{} from {} to {}",
                actor.username, issue.id, old_status, issue.status
            );
            state
                .publish(FanoutEvent::StatusChanged {
                    issue: IssueSummary::from(&issue),
                    new_status: issue.status,
                    owner_id: issue.user_id,
                    message: notification.message,
                })
                .await;
            Ok(issue)
        }
    }
}

pub async fn get_issue(state: &AppState, issue_id: i64) -> Result<Issue, ApiError> {
    run_blocking(state, move |db| db.get_issue(issue_id))
        .await?
        .ok_or(ApiError::NotFound)
}

/// Public issue feed with optional filters.
pub async fn list_issues(state: &AppState, query: IssueListQuery) -> Result<IssueListResponse, ApiError> {
    let (filter, page, per_page) = build_filter(&query, DEFAULT_PER_PAGE)?;
    page_of_issues(state, filter, page, per_page).await
}

/// Administrator view restricted to the caller's district.
pub async fn list_district_issues(
    state: &AppState,
    actor: &Identity,
    query: IssueListQuery,
) -> Result<IssueListResponse, ApiError> {
    let district = match (actor.is_admin(), actor.district.clone()) {
        (true, Some(district)) => district,
        _ => return Err(ApiError::Forbidden),
    };
    let (mut filter, page, per_page) = build_filter(&query, DEFAULT_ADMIN_PER_PAGE)?;
    filter.district = Some(district);
    page_of_issues(state, filter, page, per_page).await
}

/// Issue plus its status timeline and admin comments, for administrators of
/// the issue's district.
pub async fn issue_details(
    state: &AppState,
    actor: &Identity,
    issue_id: i64,
) -> Result<IssueDetails, ApiError> {
    if !actor.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let issue = get_issue(state, issue_id).await?;
    if !actor.administers(issue.district.as_deref()) {
        return Err(ApiError::Forbidden);
    }

    let (status_history, admin_comments) = run_blocking(state, move |db| {
        Ok((db.status_history(issue_id)?, db.admin_comments(issue_id)?))
    })
    .await?;

    Ok(IssueDetails {
        issue,
        status_history,
        admin_comments,
    })
}

/// Owners may withdraw their own reports.
pub async fn delete_issue(state: &AppState, actor: &Identity, issue_id: i64) -> Result<(), ApiError> {
    let issue = get_issue(state, issue_id).await?;
    if issue.user_id != actor.user_id {
        return Err(ApiError::Forbidden);
    }

    if !run_blocking(state, move |db| db.delete_issue(issue_id)).await? {
        return Err(ApiError::NotFound);
    }
    info!("{} ({}) deleted issue #{}", actor.username, actor.user_id, issue_id);
    Ok(())
}

/// Owners may edit the text of their own reports.
pub async fn update_issue(
    state: &AppState,
    actor: &Identity,
    issue_id: i64,
    req: UpdateIssueRequest,
) -> Result<Issue, ApiError> {
    if req.title.trim().is_empty()
        || req.description.trim().is_empty()
        || req.category.trim().is_empty()
    {
        return Err(ApiError::InvalidInput("title, description and category are required"));
    }

    let issue = get_issue(state, issue_id).await?;
    if issue.user_id != actor.user_id {
        return Err(ApiError::Forbidden);
    }

    let actor_db = actor.clone();
    let updated = run_blocking(state, move |db| db.update_issue(issue_id, &actor_db, &req))
        .await?
        .ok_or(ApiError::NotFound)?;
    info!("{} ({}) edited issue #{}", actor.username, actor.user_id, issue_id);
    Ok(updated)
}

/// The caller's own reports, newest first.
pub async fn list_user_issues(state: &AppState, user: &Identity) -> Result<UserIssuesResponse, ApiError> {
    let user_id = user.user_id;
    let issues = run_blocking(state, move |db| db.list_user_issues(user_id)).await?;
    Ok(UserIssuesResponse {
        total: issues.len() as i64,
        issues,
    })
}

/// Status counts and the most recent reports in the administrator's district.
pub async fn admin_dashboard(state: &AppState, actor: &Identity) -> Result<AdminDashboard, ApiError> {
    let district = match (actor.is_admin(), actor.district.clone()) {
        (true, Some(district)) => district,
        _ => return Err(ApiError::Forbidden),
    };

    run_blocking(state, move |db| {
        let stats = db.dashboard_stats(Some(&district))?;
        let (recent_issues, _) = db.list_issues(&IssueFilter {
            district: Some(district),
            limit: DASHBOARD_RECENT,
            ..Default::default()
        })?;
        Ok(AdminDashboard { stats, recent_issues })
    })
    .await
}

fn build_filter(query: &IssueListQuery, default_per_page: u32) -> Result<(IssueFilter, u32, u32), ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(default_per_page).clamp(1, MAX_PER_PAGE);
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<IssueStatus>)
        .transpose()?;

    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    let filter = IssueFilter {
        status,
        category: non_empty(&query.category),
        province: non_empty(&query.province),
        district: non_empty(&query.district),
        sector: non_empty(&query.sector),
        search: non_empty(&query.search),
        limit: per_page,
        offset: (page - 1).saturating_mul(per_page),
    };
    Ok((filter, page, per_page))
}

async fn page_of_issues(
    state: &AppState,
    filter: IssueFilter,
    page: u32,
    per_page: u32,
) -> Result<IssueListResponse, ApiError> {
    let (issues, total) = run_blocking(state, move |db| db.list_issues(&filter)).await?;
    let per_page = i64::from(per_page);
    Ok(IssueListResponse {
        issues,
        total,
        pages: (total + per_page - 1) / per_page,
        current_page: page,
    })
}

// -- HTTP handlers --

pub async fn create_issue_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issue = create_issue(&state, &identity, req).await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

pub async fn transition_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issue = transition(&state, &identity, issue_id, &req.status, req.comment).await?;
    Ok(Json(issue))
}

pub async fn get_issue_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(get_issue(&state, issue_id).await?))
}

pub async fn list_issues_handler(
    State(state): State<AppState>,
    Query(query): Query<IssueListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_issues(&state, query).await?))
}

pub async fn list_district_issues_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<IssueListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_district_issues(&state, &identity, query).await?))
}

pub async fn issue_details_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(issue_details(&state, &identity, issue_id).await?))
}

pub async fn update_issue_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(update_issue(&state, &identity, issue_id, req).await?))
}

pub async fn list_user_issues_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(list_user_issues(&state, &identity).await?))
}

pub async fn admin_dashboard_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(admin_dashboard(&state, &identity).await?))
}

pub async fn delete_issue_handler(
    State(state): State<AppState>,
    Path(issue_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    delete_issue(&state, &identity, issue_id).await?;
    Ok(Json(MessageResponse {
        message: "Issue deleted successfully".into(),
    }))
}
