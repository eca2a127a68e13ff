//! End-to-end tests of the notification pipeline over the in-memory store.

mod delivery_test;
mod dispatch_test;
mod helpers;
mod promotion_test;
