use axum::extract::{Extension, Query, State};
use axum::middleware::from_fn_with_state;
use axum::response::Json as ResponseJson;
use axum::routing::get;
use axum::Router;
use chkd_db::models::item::{AreaCode, CreateItem, Item, ItemStatus, Progress, UpdateItem};
use chkd_deployment::Deployment;
use chkd_utils::response::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::load_item_middleware;
use crate::DeploymentImpl;

#[derive(Debug, Deserialize)]
pub struct ItemListQuery {
    pub repo_id: Uuid,
    pub area: Option<AreaCode>,
    pub status: Option<ItemStatus>,
    pub tag: Option<String>,
    pub parent_id: Option<Uuid>,
    pub top_level: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FindOneQuery {
    pub repo_id: Uuid,
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub repo_id: Uuid,
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub repo_id: Uuid,
    pub area: Option<AreaCode>,
}

#[derive(Debug, Serialize)]
pub struct ItemWithTags {
    #[serde(flatten)]
    pub item: Item,
    pub tags: Vec<String>,
}

pub async fn list_items(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ItemListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Item>>>, ApiError> {
    let items = if let Some(tag) = &query.tag {
        Item::items_by_tag(deployment.pool(), query.repo_id, tag).await?
    } else if let Some(parent_id) = query.parent_id {
        Item::children(deployment.pool(), parent_id).await?
    } else if query.top_level.unwrap_or(false) {
        Item::top_level(deployment.pool(), query.repo_id).await?
    } else if let Some(status) = query.status {
        Item::by_status(deployment.pool(), query.repo_id, status).await?
    } else if let Some(area) = query.area {
        Item::by_area(deployment.pool(), query.repo_id, area).await?
    } else {
        Item::by_repo(deployment.pool(), query.repo_id).await?
    };
    Ok(ResponseJson(ApiResponse::success(items)))
}

pub async fn create_item(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<CreateItem>,
) -> Result<ResponseJson<ApiResponse<Item>>, ApiError> {
    let item = Item::create(deployment.pool(), &payload).await?;
    Ok(ResponseJson(ApiResponse::success(item)))
}

pub async fn get_item(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<ItemWithTags>>, ApiError> {
    let tags = Item::item_tags(deployment.pool(), item.id).await?;
    Ok(ResponseJson(ApiResponse::success(ItemWithTags { item, tags })))
}

pub async fn update_item(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<UpdateItem>,
) -> Result<ResponseJson<ApiResponse<Item>>, ApiError> {
    let updated = Item::update(deployment.pool(), item.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn delete_item(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    Item::delete(deployment.pool(), item.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
pub struct SetTagsBody {
    pub tags: Vec<String>,
}

pub async fn set_item_tags(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<SetTagsBody>,
) -> Result<ResponseJson<ApiResponse<Vec<String>>>, ApiError> {
    Item::set_tags(deployment.pool(), item.id, &payload.tags).await?;
    let tags = Item::item_tags(deployment.pool(), item.id).await?;
    Ok(ResponseJson(ApiResponse::success(tags)))
}

pub async fn get_item_ancestors(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Item>>>, ApiError> {
    let ancestors = Item::ancestors(deployment.pool(), item.id).await?;
    Ok(ResponseJson(ApiResponse::success(ancestors)))
}

pub async fn get_item_descendants(
    Extension(item): Extension<Item>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Item>>>, ApiError> {
    let descendants = Item::descendants(deployment.pool(), item.id).await?;
    Ok(ResponseJson(ApiResponse::success(descendants)))
}

/// Exact displayId -> normalized id -> title contains -> description contains (§4.2).
pub async fn find_one_item(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<FindOneQuery>,
) -> Result<ResponseJson<ApiResponse<Option<Item>>>, ApiError> {
    let item = Item::find_one(deployment.pool(), query.repo_id, &query.query).await?;
    Ok(ResponseJson(ApiResponse::success(item)))
}

pub async fn search_items(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<SearchQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Item>>>, ApiError> {
    let items = Item::search(deployment.pool(), query.repo_id, &query.query, query.limit).await?;
    Ok(ResponseJson(ApiResponse::success(items)))
}

pub async fn item_progress(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ProgressQuery>,
) -> Result<ResponseJson<ApiResponse<Progress>>, ApiError> {
    let progress = Item::progress(deployment.pool(), query.repo_id, query.area).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let item_id_router = Router::new()
        .route("/", get(get_item).put(update_item).delete(delete_item))
        .route("/tags", axum::routing::put(set_item_tags))
        .route("/ancestors", get(get_item_ancestors))
        .route("/descendants", get(get_item_descendants))
        .layer(from_fn_with_state(deployment.clone(), load_item_middleware));

    let inner = Router::new()
        .route("/", get(list_items).post(create_item))
        .route("/find-one", get(find_one_item))
        .route("/search", get(search_items))
        .route("/progress", get(item_progress))
        .nest("/{item_id}", item_id_router);

    Router::new().nest("/items", inner)
}
