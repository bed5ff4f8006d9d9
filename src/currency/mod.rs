mod convert;
mod format;

use axum::{Json, Router, debug_handler, extract::{Query, State}, routing::get};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult, AppState, rates::RateTable};

pub use convert::{CurrencyConverter, ZERO_DECIMAL_CURRENCIES, convert_with, decimals_for, round_to};
pub use format::{format_money, format_price, symbol};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rates", get(rates))
        .route("/convert", get(convert))
}

#[debug_handler(state = AppState)]
pub(crate) async fn rates(State(converter): State<CurrencyConverter>) -> Json<RateTable> {
    Json(converter.table().as_ref().clone())
}

#[derive(Deserialize)]
pub(crate) struct ConvertQuery {
    amount: f64,
    from: String,
    to: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConvertResponse {
    amount: f64,
    from: String,
    to: String,
    /// `None` when either rate is missing.
    converted: Option<f64>,
    display: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn convert(
    State(converter): State<CurrencyConverter>,
    Query(ConvertQuery { amount, from, to }): Query<ConvertQuery>,
) -> AppResult<Json<ConvertResponse>> {
    if !amount.is_finite() {
        return Err(AppError::bad_request("amount must be a finite number"));
    }

    let from = from.to_uppercase();
    let to = to.map(|to| to.to_uppercase()).unwrap_or_else(|| converter.base().to_owned());

    let converted = converter.convert(amount, &from, &to).ok();
    Ok(Json(ConvertResponse {
        display: converter.format_price(amount, &from),
        amount,
        from,
        to,
        converted,
    }))
}
