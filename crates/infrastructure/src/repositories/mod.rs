//! Repository implementations for data persistence.
//!
//! Each entity has an `async_trait` repository trait and a PostgreSQL
//! implementation over a shared `PgPool`. `Repositories` bundles one of each
//! behind `Arc<dyn Trait>` for the service layer.

mod query;

mod article_repository;
mod category_repository;
mod event_repository;
mod hit_repository;
mod image_repository;
mod news_repository;
mod qr_code_repository;
mod survey_repository;
mod user_repository;
mod video_repository;
mod wechat_user_repository;

pub use article_repository::*;
pub use category_repository::{CategoryQuery, CategoryRepository, PgCategoryRepository};
pub use event_repository::*;
pub use hit_repository::*;
pub use image_repository::*;
pub use news_repository::*;
pub use qr_code_repository::*;
pub use survey_repository::*;
pub use user_repository::*;
pub use video_repository::*;
pub use wechat_user_repository::*;

use std::sync::Arc;

use sqlx::PgPool;

/// One repository per entity, sharing a pool.
#[derive(Clone)]
pub struct Repositories {
    pub articles: Arc<dyn ArticleRepository>,
    pub categories: Arc<dyn CategoryRepository>,
    pub news: Arc<dyn NewsRepository>,
    pub images: Arc<dyn ImageRepository>,
    pub videos: Arc<dyn VideoRepository>,
    pub surveys: Arc<dyn SurveyRepository>,
    pub wechat_users: Arc<dyn WeChatUserRepository>,
    pub qr_codes: Arc<dyn QrCodeRepository>,
    pub users: Arc<dyn UserRepository>,
    pub events: Arc<dyn EventRepository>,
    pub hits: Arc<dyn HitRepository>,
}

impl Repositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            articles: Arc::new(PgArticleRepository::new(pool.clone())),
            categories: Arc::new(PgCategoryRepository::new(pool.clone())),
            news: Arc::new(PgNewsRepository::new(pool.clone())),
            images: Arc::new(PgImageRepository::new(pool.clone())),
            videos: Arc::new(PgVideoRepository::new(pool.clone())),
            surveys: Arc::new(PgSurveyRepository::new(pool.clone())),
            wechat_users: Arc::new(PgWeChatUserRepository::new(pool.clone())),
            qr_codes: Arc::new(PgQrCodeRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool.clone())),
            events: Arc::new(PgEventRepository::new(pool.clone())),
            hits: Arc::new(PgHitRepository::new(pool)),
        }
    }
}
