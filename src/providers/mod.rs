pub mod gemini;
pub mod google_ads;
pub mod google_oauth;
