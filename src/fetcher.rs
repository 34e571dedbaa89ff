use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::interval::Interval;
use crate::pacing::RequestPacer;
use crate::search::{Place, Post, SearchApi, SearchPage, SearchQuery, User};

pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub user: User,
    pub place: Place,
    #[serde(rename = "tweet")]
    pub post: Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIssue {
    MissingGeo { post_id: String },
    UnresolvedPlace { post_id: String, place_id: Option<String> },
    UnresolvedAuthor { post_id: String, author_id: Option<String> },
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIssue::MissingGeo { post_id } => {
                write!(f, "post {post_id} missing geo info")
            }
            RecordIssue::UnresolvedPlace { place_id, .. } => write!(
                f,
                "place {} not included in reply",
                place_id.as_deref().unwrap_or("UNKNOWN")
            ),
            RecordIssue::UnresolvedAuthor { author_id, .. } => write!(
                f,
                "author {} not included in reply",
                author_id.as_deref().unwrap_or("UNKNOWN")
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageJoin {
    pub records: Vec<JoinedRecord>,
    pub places: Vec<Place>,
    pub issues: Vec<RecordIssue>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<JoinedRecord>,
    pub places: Vec<Place>,
    pub issues: Vec<RecordIssue>,
    pub pages: u32,
}

impl FetchBatch {
    fn absorb(&mut self, page: PageJoin) {
        self.records.extend(page.records);
        self.places.extend(page.places);
        self.issues.extend(page.issues);
        self.pages += 1;
    }
}

pub fn join_page(page: SearchPage) -> PageJoin {
    let SearchPage { data, includes, .. } = page;
    let users: HashMap<String, User> = includes
        .users
        .into_iter()
        .map(|user| (user.id.clone(), user))
        .collect();
    let places: HashMap<String, Place> = includes
        .places
        .into_iter()
        .map(|place| (place.id.clone(), place))
        .collect();

    let mut joined = PageJoin {
        places: places.values().cloned().collect(),
        ..PageJoin::default()
    };
    for post in data {
        match resolve(&post, &users, &places) {
            Ok((user, place)) => joined.records.push(JoinedRecord {
                user: user.clone(),
                place: place.clone(),
                post,
            }),
            Err(issue) => {
                warn!(post_id = %post.id, %issue, "dropping unresolvable post");
                joined.issues.push(issue);
            }
        }
    }
    joined
}

fn resolve<'a>(
    post: &Post,
    users: &'a HashMap<String, User>,
    places: &'a HashMap<String, Place>,
) -> Result<(&'a User, &'a Place), RecordIssue> {
    let Some(geo) = &post.geo else {
        return Err(RecordIssue::MissingGeo {
            post_id: post.id.clone(),
        });
    };
    let place = geo
        .place_id
        .as_ref()
        .and_then(|id| places.get(id))
        .ok_or_else(|| RecordIssue::UnresolvedPlace {
            post_id: post.id.clone(),
            place_id: geo.place_id.clone(),
        })?;
    let user = post
        .author_id
        .as_ref()
        .and_then(|id| users.get(id))
        .ok_or_else(|| RecordIssue::UnresolvedAuthor {
            post_id: post.id.clone(),
            author_id: post.author_id.clone(),
        })?;
    Ok((user, place))
}

pub struct Fetcher {
    api: Arc<dyn SearchApi>,
    pacer: Arc<RequestPacer>,
    page_size: u32,
    page_limit: u32,
}

impl Fetcher {
    pub fn new(api: Arc<dyn SearchApi>, pacer: Arc<RequestPacer>) -> Self {
        Self {
            api,
            pacer,
            page_size: DEFAULT_PAGE_SIZE,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub async fn fetch(&self, interval: Interval) -> AppResult<FetchBatch> {
        info!(%interval, "fetching interval");
        let query = SearchQuery::new(interval, self.page_size);
        let mut batch = FetchBatch::default();
        let mut next_token: Option<String> = None;

        while batch.pages < self.page_limit {
            self.pacer.wait().await;
            let page = match self.api.search_page(&query, next_token.as_deref()).await {
                Ok(page) => {
                    self.pacer.record_success();
                    page
                }
                Err(err) => {
                    if err.is_throttled() {
                        self.pacer.record_throttled();
                    }
                    return Err(err);
                }
            };
            next_token = page.meta.next_token.clone();
            let joined = join_page(page);
            debug!(
                page = batch.pages + 1,
                joined = joined.records.len(),
                dropped = joined.issues.len(),
                "page joined"
            );
            batch.absorb(joined);
            if next_token.is_none() {
                break;
            }
        }

        Ok(batch)
    }
}
