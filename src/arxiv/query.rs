//! Upstream query parameters.
//!
//! The parameter names are part of the arXiv API surface and must not change.

use super::ArxivError;
use crate::models::SearchCriteria;

pub const PARAM_SEARCH_QUERY: &str = "search_query";
pub const PARAM_ID_LIST: &str = "id_list";
pub const PARAM_START: &str = "start";
pub const PARAM_MAX_RESULTS: &str = "max_results";
pub const PARAM_SORT_BY: &str = "sortBy";
pub const PARAM_SORT_ORDER: &str = "sortOrder";

/// What the criteria asks upstream for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    Expression(String),
    Identifiers(Vec<String>),
}

/// Check that exactly one of query and id_list is set and usable.
///
/// Called before any network I/O so a bad request never reaches upstream.
pub fn validate_criteria(criteria: &SearchCriteria) -> Result<QueryTarget, ArxivError> {
    if criteria.max_results == Some(0) {
        return Err(ArxivError::QueryBuild(
            "max_results must be at least 1 when set".to_string(),
        ));
    }

    match (&criteria.query, &criteria.id_list) {
        (Some(_), Some(_)) => Err(ArxivError::QueryBuild(
            "query and id_list are mutually exclusive".to_string(),
        )),
        (None, None) => Err(ArxivError::QueryBuild(
            "either query or id_list must be provided".to_string(),
        )),
        (Some(query), None) => {
            let query = query.trim();
            if query.is_empty() {
                return Err(ArxivError::QueryBuild("query is empty".to_string()));
            }
            Ok(QueryTarget::Expression(query.to_string()))
        }
        (None, Some(ids)) => {
            if ids.is_empty() {
                return Err(ArxivError::QueryBuild("id_list is empty".to_string()));
            }
            let mut cleaned = Vec::with_capacity(ids.len());
            for id in ids {
                let id = id.trim();
                if id.is_empty() {
                    return Err(ArxivError::QueryBuild(
                        "id_list contains an empty identifier".to_string(),
                    ));
                }
                if id.contains(',') {
                    return Err(ArxivError::QueryBuild(format!(
                        "identifier {:?} contains a comma",
                        id
                    )));
                }
                cleaned.push(id.to_string());
            }
            Ok(QueryTarget::Identifiers(cleaned))
        }
    }
}

/// Build the parameters for one page request
pub fn build_query_params(
    criteria: &SearchCriteria,
    offset: u64,
    page_size: u64,
) -> Result<Vec<(&'static str, String)>, ArxivError> {
    let mut params = Vec::with_capacity(6);
    match validate_criteria(criteria)? {
        QueryTarget::Expression(query) => params.push((PARAM_SEARCH_QUERY, query)),
        QueryTarget::Identifiers(ids) => params.push((PARAM_ID_LIST, ids.join(","))),
    }
    params.push((PARAM_START, offset.to_string()));
    params.push((PARAM_MAX_RESULTS, page_size.to_string()));
    if let Some(sort_by) = criteria.sort_by {
        params.push((PARAM_SORT_BY, sort_by.as_param().to_string()));
    }
    if let Some(sort_order) = criteria.sort_order {
        params.push((PARAM_SORT_ORDER, sort_order.as_param().to_string()));
    }
    Ok(params)
}
