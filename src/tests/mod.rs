mod api;
mod app;
