//! Test fixtures producing valid create inputs with realistic data.
//!
//! Every fixture passes the input's `validate()` rules. Values that must be
//! unique in the database (usernames, slugs, openids, QR scenes) carry a
//! random suffix so fixtures can be created repeatedly in one test run.

use chrono::{Duration, Utc};
use fake::{
    faker::{
        internet::en::{FreeEmail, Username},
        lorem::en::{Paragraph, Sentence, Word},
        name::en::Name,
    },
    Fake,
};
use uuid::Uuid;

use cms_domain::{
    article::{ArticleStatus, NewArticle},
    category::NewCategory,
    event::{EventStatus, NewEvent},
    hit::{HitTarget, NewHit},
    identifiers::*,
    media::{NewImage, NewVideo, VideoStatus},
    news::NewNews,
    survey::{NewQuestion, NewSurvey, QuestionKind},
    user::{NewUser, UserRole},
    wechat::{Gender, NewQrCode, QrCodeKind, WeChatProfile},
};

/// Eight random lowercase hex characters
pub fn unique_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `prefix-xxxxxxxx`, valid as a slug when `prefix` is
pub fn unique_slug(prefix: &str) -> String {
    format!("{}-{}", prefix, unique_suffix())
}

/// Create a member account input
pub fn new_test_user() -> NewUser {
    new_test_user_with_role(UserRole::Member)
}

/// Create an account input with a specific role
pub fn new_test_user_with_role(role: UserRole) -> NewUser {
    let username: String = Username().fake();
    let username: String = username
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(20)
        .collect();
    let email: String = FreeEmail().fake();
    let suffix = unique_suffix();

    NewUser {
        username: format!("{}_{}", username, suffix),
        email: format!("{}.{}", suffix, email),
        phone: Some(format!("138{:08}", (0u32..100_000_000).fake::<u32>())),
        display_name: Some(Name().fake()),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        role,
    }
}

/// Create an editor account input
pub fn new_test_editor() -> NewUser {
    new_test_user_with_role(UserRole::Editor)
}

/// Create an admin account input
pub fn new_test_admin() -> NewUser {
    new_test_user_with_role(UserRole::Admin)
}

/// Create a category input under `parent`
pub fn new_test_category(parent_id: Option<CategoryId>) -> NewCategory {
    let word: String = Word().fake();
    NewCategory {
        parent_id,
        name: capitalize(&word),
        slug: unique_slug(&word.to_ascii_lowercase()),
        sort_order: 0,
    }
}

/// Create a draft article input
pub fn new_test_article(category_id: Option<CategoryId>, author_id: Option<UserId>) -> NewArticle {
    NewArticle {
        category_id,
        author_id,
        title: Sentence(3..6).fake(),
        summary: Sentence(8..12).fake(),
        content: Paragraph(3..5).fake(),
        cover_url: None,
        status: ArticleStatus::Draft,
        is_recommended: false,
        tags: vec![Word().fake(), Word().fake()],
    }
}

/// Create a news input published now
pub fn new_test_news() -> NewNews {
    NewNews {
        title: Sentence(3..6).fake(),
        summary: Sentence(8..12).fake(),
        content: Paragraph(2..4).fake(),
        source: Some("Campus Daily".to_string()),
        source_url: Some(format!("https://news.example.com/{}", unique_suffix())),
        cover_url: None,
        published_at: Some(Utc::now()),
    }
}

/// Create an image input
pub fn new_test_image(album: Option<&str>) -> NewImage {
    let name: String = Word().fake();
    NewImage {
        uploader_id: None,
        album: album.map(str::to_string),
        title: capitalize(&name),
        url: format!("https://cdn.example.com/images/{}.png", unique_suffix()),
        mime_type: "image/png".to_string(),
        width: 1280,
        height: 720,
        size_bytes: (10_000i64..2_000_000).fake(),
        alt_text: Some(Sentence(3..5).fake()),
    }
}

/// Create a ready-to-play video input
pub fn new_test_video(category_id: Option<CategoryId>) -> NewVideo {
    NewVideo {
        category_id,
        uploader_id: None,
        title: Sentence(2..5).fake(),
        description: Paragraph(1..2).fake(),
        url: format!("https://cdn.example.com/videos/{}.mp4", unique_suffix()),
        cover_url: None,
        duration_seconds: (30..3600).fake(),
        status: VideoStatus::Ready,
    }
}

/// Create a survey input with one single-choice, one multiple-choice and one
/// optional text question
pub fn new_test_survey() -> NewSurvey {
    NewSurvey {
        title: Sentence(3..5).fake(),
        description: Sentence(6..10).fake(),
        starts_at: None,
        ends_at: None,
        allow_anonymous: true,
        questions: vec![
            NewQuestion {
                title: "How satisfied are you?".to_string(),
                kind: QuestionKind::SingleChoice,
                required: true,
                options: vec!["Very".to_string(), "Somewhat".to_string(), "Not at all".to_string()],
            },
            NewQuestion {
                title: "Which sections do you read?".to_string(),
                kind: QuestionKind::MultipleChoice,
                required: false,
                options: vec!["News".to_string(), "Events".to_string(), "Videos".to_string()],
            },
            NewQuestion {
                title: "Anything else?".to_string(),
                kind: QuestionKind::Text,
                required: false,
                options: vec![],
            },
        ],
    }
}

/// Create an open event a week from now
pub fn new_test_event(capacity: Option<i32>) -> NewEvent {
    let starts_at = Utc::now() + Duration::days(7);
    NewEvent {
        title: Sentence(2..5).fake(),
        description: Paragraph(1..3).fake(),
        location: format!("{} Hall", capitalize(&Word().fake::<String>())),
        cover_url: None,
        starts_at,
        ends_at: starts_at + Duration::hours(3),
        registration_deadline: Some(starts_at - Duration::days(1)),
        capacity,
        status: EventStatus::Open,
    }
}

/// Create a subscribed WeChat profile
pub fn new_test_profile() -> WeChatProfile {
    WeChatProfile {
        openid: format!("o{}", Uuid::new_v4().simple()),
        unionid: Some(format!("u{}", Uuid::new_v4().simple())),
        nickname: Name().fake(),
        avatar_url: None,
        gender: Gender::Unknown,
        city: Some("Hangzhou".to_string()),
        province: Some("Zhejiang".to_string()),
        country: Some("China".to_string()),
        subscribed: true,
    }
}

/// Create a permanent QR code input
pub fn new_test_qr_code(event_id: Option<EventId>) -> NewQrCode {
    NewQrCode {
        scene: unique_slug("scene"),
        kind: QrCodeKind::Permanent,
        ticket: format!("gQ{}", Uuid::new_v4().simple()),
        url: format!("http://weixin.qq.com/q/{}", unique_suffix()),
        event_id,
        expires_at: None,
    }
}

/// Create a temporary QR code input expiring after `ttl`
pub fn new_test_temporary_qr_code(ttl: Duration) -> NewQrCode {
    NewQrCode {
        kind: QrCodeKind::Temporary,
        expires_at: Some(Utc::now() + ttl),
        ..new_test_qr_code(None)
    }
}

/// Create a hit from a random IPv4 address
pub fn new_test_hit(target: impl Into<HitTarget>) -> NewHit {
    let octets: [u8; 4] = [10, (0u8..255).fake(), (0u8..255).fake(), (1u8..255).fake()];
    NewHit {
        ip: Some(format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])),
        user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) MicroMessenger/8.0".to_string()),
        referer: None,
        ..NewHit::anonymous(target)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
