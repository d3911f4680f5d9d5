pub mod canvas;
pub mod google;
