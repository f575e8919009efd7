/*!
# Valuation Desk

Back office for bank property valuations: field engineers submit appraisal
forms, managers review them, and everyone works from one merged dashboard.

## Overview

Records live in six collections, one per form type (`bomflat`, `ubishop`,
`ubiapf`, `sbiflat`, `sbiland`, `industrial`). The dashboard fetches all six
concurrently, merges them on `uniqueId` keeping the most recently updated
copy, and derives its statistics from the merged list.

## Architecture

### Domain
- **record**: the loosely typed `ValuationRecord` and its enums
- **reconcile**: concurrent fetch of all form types and the merge
- **analytics**: status counts, completion rate, engineer, bank and city
  rankings, monthly trend, payment split
- **valuation**: line-item arithmetic (`quantityN x rateN`), round figure and
  the 90/80/35 percent values
- **prefill** / **local_store**: last-submission prefill and per-tab drafts on
  top of a keyed JSON blob store
- **workflow**: who may move a record between statuses

### Services
- **store**: file-backed record collections with CRUD and submission
- **dashboard**: filtering, sorting and pagination of the table
- **poller**: periodic refresh that never applies a stale response
- **uploads**: concurrent image uploads with per-file outcome
- **saving**: gzip JSON snapshots
- **downloader**: CSV and XLSX export

### Web layer (feature `web`)
- **login**: argon2 users, rotating session tokens, auth middleware
- **graph**: SVG charts rendered with plotters
- **app**: axum routes and server start-up

### Ambient
- **config**: layered configuration (defaults, `Valuation.toml`, `VALUATION_*`)
- **logging**: `env_logger` set-up
- **error**: the crate error type

## REST API Endpoints

- `/api/auth/{login,register,refresh,logout}` - Sessions
- `/api/records` - Dashboard page with filters, sorting and paging
- `/api/records/{form}/{id}/status` - Approval workflow
- `/api/analytics`, `/api/graphs/{kind}` - Statistics and charts
- `/api/export/{csv,xlsx}` - Download the filtered list
- `/api/forms/{form}/{id}` - Open, draft, submit and attach images
- `/api/calc` - Line-item recalculation
*/

pub mod analytics;
pub mod config;
pub mod dashboard;
pub mod downloader;
pub mod error;
pub mod local_store;
pub mod logging;
pub mod poller;
pub mod prefill;
pub mod reconcile;
pub mod record;
pub mod saving;
pub mod store;
pub mod uploads;
pub mod valuation;
pub mod workflow;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;

pub use error::{Error, Result};
pub use record::{FieldBag, FormType, Payment, RecordKey, Status, ValuationRecord};
