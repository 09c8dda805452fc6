use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Page selection from the `page_num` and `page_size` query parameters.
/// Pages are numbered from 1.
pub struct Pagination {
    page_num: usize,
    page_size: usize,
    skip: u64,
}

impl Pagination {
    /// `None` unless both are positive, the page size is within bounds and
    /// the page's offset is representable.
    pub fn new(page_num: usize, page_size: usize) -> Option<Self> {
        if page_num == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
            return None;
        }
        // The server stores the offset as a signed 64-bit integer.
        let skip = (page_num - 1)
            .checked_mul(page_size)
            .and_then(|skip| i64::try_from(skip).ok())? as u64;
        Some(Self {
            page_num,
            page_size,
            skip,
        })
    }

    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub fn result(self, total: usize) -> PaginationResult {
        PaginationResult {
            page_num: self.page_num,
            page_size: self.page_size,
            total,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let page_num = req.query_value::<usize>("page_num").unwrap_or(Ok(1));
        let page_size = req
            .query_value::<usize>("page_size")
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE));
        match (page_num, page_size) {
            (Ok(page_num), Ok(page_size)) => match Self::new(page_num, page_size) {
                Some(pagination) => request::Outcome::Success(pagination),
                None => request::Outcome::Failure((Status::BadRequest, ())),
            },
            _ => request::Outcome::Failure((Status::BadRequest, ())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult {
    pub page_num: usize,
    pub page_size: usize,
    pub total: usize,
}

/// One page of items plus where it sits in the full listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}
