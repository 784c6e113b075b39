//! Pipeline stages for locating, downloading and assembling a book.
//!
//! Each submodule implements one step and can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! lookup ──▶ download ──▶ assemble ──▶ resize
//! (mirrors)  (manifest +   (tool       (gs, optional)
//!             fetch)        chain)
//! ```
//!
//! 1. [`lookup`]:   probe mirror hosts in priority order; uses [`scrape`]
//!    for the metadata table and [`resolve`] for the reader link
//! 2. [`download`]: build the page manifest and hand it to a
//!    [`fetch`] strategy; count what arrived
//! 3. [`assemble`]: run the selected conversion toolchain stage by stage
//! 4. [`resize`]:   re-render the PDF at a paper size, replacing it only on
//!    success
//!
//! Every external program is started through [`tools`].

pub mod assemble;
pub mod download;
pub mod fetch;
pub mod lookup;
pub mod resize;
pub mod resolve;
pub mod scrape;
pub mod tools;
