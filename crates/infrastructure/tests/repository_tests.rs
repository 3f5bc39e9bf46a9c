//! Integration tests for repository implementations
//!
//! These tests require a PostgreSQL database and are marked with #[ignore] for CI.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test repository_tests -- --ignored

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};

use cms_common::pagination::{DateRange, PaginationParams};
use cms_domain::{
    article::{ArticleFilter, ArticleStatus},
    category::CategoryUpdate,
    event::{EventUpdate, RegistrationStatus},
    hit::TargetKind,
    media::VideoStatus,
    news::{NewsFilter, SourceCount},
    survey::{Respondent, SurveyStatus},
    user::UserStatus,
    wechat::WeChatUserFilter,
    EventId, ImageId,
};
use cms_infrastructure::{ArticleQuery, Error, Repositories, WeChatUserQuery};
use cms_testing::{builders::*, fixtures::*, TestDatabase};

/// Every test truncates the whole schema, so they must not overlap.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn setup() -> (MutexGuard<'static, ()>, TestDatabase, Repositories) {
    let guard = DB_LOCK.lock().await;
    let db = TestDatabase::from_env().await.unwrap();
    let repos = Repositories::new(db.pool().clone());
    (guard, db, repos)
}

#[tokio::test]
#[ignore]
async fn test_article_create_and_read_back() {
    let (_guard, _db, repos) = setup().await;

    let author = repos.users.create(new_test_editor()).await.unwrap();
    let category = repos.categories.create(new_test_category(None)).await.unwrap();
    let input = ArticleBuilder::new()
        .with_title("Library opening hours")
        .with_category(category.id)
        .with_author(author.id)
        .with_tags(["library", "campus"])
        .build();

    let created = repos.articles.create(input).await.unwrap();
    assert_eq!(created.status, ArticleStatus::Draft);
    assert!(created.published_at.is_none());

    let detail = repos.articles.get_detail(created.id).await.unwrap();
    assert_eq!(detail.article.title, "Library opening hours");
    assert_eq!(detail.article.tags, vec!["library", "campus"]);
    assert_eq!(detail.category.map(|c| c.id), Some(category.id));
    assert_eq!(detail.author.map(|a| a.id), Some(author.id));
}

#[tokio::test]
#[ignore]
async fn test_soft_deleted_article_is_hidden() {
    let (_guard, _db, repos) = setup().await;

    let article = repos.articles.create(new_test_article(None, None)).await.unwrap();
    assert!(repos.articles.delete(article.id).await.unwrap());
    assert!(!repos.articles.delete(article.id).await.unwrap());

    let err = repos.articles.get_by_id(article.id).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(repos.articles.count(&ArticleFilter::default()).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_article_filters_narrow_results() {
    let (_guard, _db, repos) = setup().await;

    let parent = repos.categories.create(new_test_category(None)).await.unwrap();
    let child = repos
        .categories
        .create(new_test_category(Some(parent.id)))
        .await
        .unwrap();

    repos
        .articles
        .create(ArticleBuilder::new().with_category(child.id).published().with_tags(["sports"]).build())
        .await
        .unwrap();
    repos
        .articles
        .create(ArticleBuilder::new().with_category(parent.id).build())
        .await
        .unwrap();
    repos.articles.create(new_test_article(None, None)).await.unwrap();

    let direct = ArticleFilter {
        category_id: Some(parent.id),
        ..Default::default()
    };
    assert_eq!(repos.articles.count(&direct).await.unwrap(), 1);

    let subtree = ArticleFilter {
        include_subcategories: true,
        ..direct.clone()
    };
    assert_eq!(repos.articles.count(&subtree).await.unwrap(), 2);

    let published = ArticleFilter {
        status: Some(ArticleStatus::Published),
        tag: Some("Sports".to_string()),
        ..Default::default()
    };
    let page = repos
        .articles
        .list(ArticleQuery {
            filter: published,
            pagination: PaginationParams::new(1, 10),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items.len(), 1);
    assert!(page.items[0].published_at.is_some());
}

#[tokio::test]
#[ignore]
async fn test_set_top_is_exclusive() {
    let (_guard, _db, repos) = setup().await;

    let first = repos.articles.create(new_test_article(None, None)).await.unwrap();
    let second = repos.articles.create(new_test_article(None, None)).await.unwrap();

    repos.articles.set_top(first.id).await.unwrap();
    repos.articles.set_top(second.id).await.unwrap();

    let top = repos.articles.get_top().await.unwrap().unwrap();
    assert_eq!(top.id, second.id);
    assert!(!repos.articles.get_by_id(first.id).await.unwrap().is_top);

    assert_eq!(repos.articles.clear_top().await.unwrap(), 1);
    assert!(repos.articles.get_top().await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_category_rules() {
    let (_guard, _db, repos) = setup().await;

    let root = repos.categories.create(new_test_category(None)).await.unwrap();
    let child = repos
        .categories
        .create(new_test_category(Some(root.id)))
        .await
        .unwrap();

    let cycle = CategoryUpdate {
        parent_id: Some(Some(child.id)),
        ..Default::default()
    };
    let err = repos.categories.update(root.id, cycle).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);

    let err = repos.categories.delete(root.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let duplicate = cms_domain::category::NewCategory {
        slug: child.slug.clone(),
        ..new_test_category(None)
    };
    let err = repos.categories.create(duplicate).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let tree = repos.categories.tree().await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].size(), 2);
    assert_eq!(
        repos.categories.ancestors(child.id).await.unwrap()[0].id,
        root.id
    );
}

#[tokio::test]
#[ignore]
async fn test_event_registration_capacity() {
    let (_guard, _db, repos) = setup().await;

    let event = repos
        .events
        .create(EventBuilder::new().with_capacity(1).build())
        .await
        .unwrap();
    let alice = repos.users.create(new_test_user()).await.unwrap();
    let bob = repos.users.create(new_test_user()).await.unwrap();

    let registration = repos.events.register(event.id, alice.id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Registered);

    let err = repos.events.register(event.id, alice.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let err = repos.events.register(event.id, bob.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let shrink = EventUpdate {
        capacity: Some(Some(0)),
        ..Default::default()
    };
    let err = repos.events.update(event.id, shrink).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);

    assert!(repos.events.cancel_registration(event.id, alice.id).await.unwrap());
    let seat = repos.events.register(event.id, bob.id).await.unwrap();
    assert_eq!(seat.user_id, bob.id);

    let checked_in = repos.events.check_in(event.id, bob.id).await.unwrap();
    assert_eq!(checked_in.status, RegistrationStatus::CheckedIn);
    let again = repos.events.check_in(event.id, bob.id).await.unwrap();
    assert_eq!(again.checked_in_at, checked_in.checked_in_at);

    let reloaded = repos.events.get_by_id(event.id).await.unwrap();
    assert_eq!(reloaded.registered_count, 1);
    assert!(reloaded.is_full());
}

#[tokio::test]
#[ignore]
async fn test_survey_statistics() {
    let (_guard, _db, repos) = setup().await;

    let created = repos
        .surveys
        .create(
            SurveyBuilder::new()
                .single_choice("Favourite section", &["News", "Events"])
                .text("Comments", false)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(created.status, SurveyStatus::Draft);
    repos.surveys.set_status(created.id, SurveyStatus::Published).await.unwrap();

    let survey = repos.surveys.get_by_id(created.id).await.unwrap();
    let choice = &survey.questions[0];
    let news = choice.options[0].id;
    let events = choice.options[1].id;

    for option in [news, news, events] {
        let response = ResponseBuilder::new(survey.id).choose(choice.id, [option]).build();
        repos.surveys.submit_response(response).await.unwrap();
    }
    let with_comment = ResponseBuilder::new(survey.id)
        .by(Respondent::WeChat(new_test_profile().openid))
        .choose(choice.id, [events])
        .write(survey.questions[1].id, "More videos please")
        .build();
    repos.surveys.submit_response(with_comment).await.unwrap();

    let missing_required = ResponseBuilder::new(survey.id)
        .write(survey.questions[1].id, "no choice")
        .build();
    let err = repos.surveys.submit_response(missing_required).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);

    let stats = repos.surveys.statistics(survey.id).await.unwrap();
    assert_eq!(stats.responses, 4);
    assert_eq!(repos.surveys.response_count(survey.id).await.unwrap(), 4);

    let choice_stats = &stats.questions[0];
    assert_eq!(choice_stats.answered, 4);
    assert_eq!(choice_stats.options[0].count, 2);
    assert_eq!(choice_stats.options[1].count, 2);
    assert!((choice_stats.options[0].percentage - 50.0).abs() < f64::EPSILON);
    assert_eq!(stats.questions[1].answered, 1);
}

#[tokio::test]
#[ignore]
async fn test_wechat_upsert_revives_follower() {
    let (_guard, _db, repos) = setup().await;

    let profile = new_test_profile();
    let follower = repos.wechat_users.upsert(profile.clone()).await.unwrap();
    let user = repos.users.create(new_test_user()).await.unwrap();
    repos.wechat_users.bind_user(follower.id, user.id).await.unwrap();

    let unsubscribed = repos
        .wechat_users
        .set_subscribed(&profile.openid, false)
        .await
        .unwrap();
    assert!(!unsubscribed.subscribed);
    assert!(unsubscribed.unsubscribed_at.is_some());

    assert!(repos.wechat_users.delete(follower.id).await.unwrap());
    assert!(repos.wechat_users.find_by_openid(&profile.openid).await.unwrap().is_none());

    let revived = repos.wechat_users.upsert(profile.clone()).await.unwrap();
    assert_eq!(revived.id, follower.id);
    assert_eq!(revived.user_id, Some(user.id));
    assert!(revived.subscribed);

    let bound = repos
        .wechat_users
        .list(WeChatUserQuery {
            filter: WeChatUserFilter {
                bound: Some(true),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bound.total, 1);

    let today = repos
        .wechat_users
        .daily_subscriptions(DateRange::last_days(Utc::now(), 1))
        .await
        .unwrap();
    assert_eq!(today.len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_qr_code_scans() {
    let (_guard, _db, repos) = setup().await;

    let code = repos.qr_codes.create(new_test_qr_code(None)).await.unwrap();
    let scanned = repos.qr_codes.record_scan(code.id).await.unwrap();
    assert_eq!(scanned.scan_count, 1);
    assert!(scanned.last_scanned_at.is_some());

    let duplicate = cms_domain::wechat::NewQrCode {
        scene: code.scene.clone(),
        ..new_test_qr_code(None)
    };
    let err = repos.qr_codes.create(duplicate).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let expired = repos
        .qr_codes
        .create(new_test_temporary_qr_code(Duration::milliseconds(1)))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let err = repos.qr_codes.record_scan(expired.id).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);
}

#[tokio::test]
#[ignore]
async fn test_hit_statistics() {
    let (_guard, _db, repos) = setup().await;

    let article = repos.articles.create(new_test_article(None, None)).await.unwrap();
    let other = repos.articles.create(new_test_article(None, None)).await.unwrap();
    for _ in 0..3 {
        repos.hits.record(new_test_hit(article.id)).await.unwrap();
    }
    repos.hits.record(new_test_hit(other.id)).await.unwrap();

    let range = DateRange::last_days(Utc::now(), 7);
    let daily = repos
        .hits
        .daily_counts(TargetKind::Article, None, range)
        .await
        .unwrap();
    assert_eq!(daily.len(), 7);
    assert_eq!(daily.iter().map(|d| d.count).sum::<u64>(), 4);

    let top = repos.hits.top_targets(TargetKind::Article, range, 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].target.id, article.id.into_uuid());
    assert_eq!(top[0].count, 3);

    let purged = repos.hits.purge_before(Utc::now() + Duration::seconds(1)).await.unwrap();
    assert_eq!(purged, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_concurrent_set_top_leaves_one_pinned() {
    let (_guard, _db, repos) = setup().await;

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(repos.articles.create(new_test_article(None, None)).await.unwrap().id);
    }

    let tasks: Vec<_> = ids
        .iter()
        .map(|&id| {
            let repos = repos.clone();
            tokio::spawn(async move { repos.articles.set_top(id).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let pinned = ArticleFilter {
        is_top: Some(true),
        ..Default::default()
    };
    assert_eq!(repos.articles.count(&pinned).await.unwrap(), 1);
    let top = repos.articles.get_top().await.unwrap().unwrap();
    assert!(ids.contains(&top.id));
}

#[tokio::test]
#[ignore]
async fn test_set_featured_is_exclusive() {
    let (_guard, _db, repos) = setup().await;

    let first = repos.events.create(new_test_event(None)).await.unwrap();
    let second = repos.events.create(new_test_event(None)).await.unwrap();

    repos.events.set_featured(first.id).await.unwrap();
    repos.events.set_featured(second.id).await.unwrap();

    let featured = repos.events.get_featured().await.unwrap().unwrap();
    assert_eq!(featured.id, second.id);
    assert!(!repos.events.get_by_id(first.id).await.unwrap().is_featured);

    let err = repos.events.set_featured(EventId::new()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(repos.events.get_featured().await.unwrap().unwrap().id, second.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_capacity_change_racing_registration() {
    let (_guard, _db, repos) = setup().await;

    for _ in 0..5 {
        let event = repos
            .events
            .create(EventBuilder::new().with_capacity(2).build())
            .await
            .unwrap();
        let alice = repos.users.create(new_test_user()).await.unwrap();
        let bob = repos.users.create(new_test_user()).await.unwrap();
        repos.events.register(event.id, alice.id).await.unwrap();

        let shrink = EventUpdate {
            capacity: Some(Some(1)),
            ..Default::default()
        };
        let (updated, registered) = tokio::join!(
            repos.events.update(event.id, shrink),
            repos.events.register(event.id, bob.id)
        );
        assert!(updated.is_ok() != registered.is_ok(), "{:?} / {:?}", updated, registered);

        let reloaded = repos.events.get_by_id(event.id).await.unwrap();
        let capacity = reloaded.capacity.unwrap();
        assert!(reloaded.registered_count <= i64::from(capacity));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_category_delete_racing_child_create() {
    let (_guard, _db, repos) = setup().await;

    for _ in 0..5 {
        let parent = repos.categories.create(new_test_category(None)).await.unwrap();

        let (deleted, created) = tokio::join!(
            repos.categories.delete(parent.id),
            repos.categories.create(new_test_category(Some(parent.id)))
        );

        match (deleted, created) {
            (Ok(true), Err(err)) => assert!(err.is_not_found(), "{:?}", err),
            (Err(Error::Conflict(_)), Ok(child)) => {
                let chain = repos.categories.ancestors(child.id).await.unwrap();
                assert_eq!(chain[0].id, parent.id);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_count_by_category_skips_deleted_categories() {
    let (_guard, _db, repos) = setup().await;

    let kept = repos.categories.create(new_test_category(None)).await.unwrap();
    let dropped = repos.categories.create(new_test_category(None)).await.unwrap();
    repos.articles.create(new_test_article(Some(kept.id), None)).await.unwrap();
    repos.articles.create(new_test_article(Some(dropped.id), None)).await.unwrap();
    repos.articles.create(new_test_article(None, None)).await.unwrap();

    assert!(repos.categories.delete(dropped.id).await.unwrap());

    let counts = repos.articles.count_by_category().await.unwrap();
    assert_eq!(counts.len(), 2);
    let uncategorised = counts.iter().find(|c| c.category_id.is_none()).unwrap();
    assert_eq!(uncategorised.count, 1);
    let live = counts.iter().find(|c| c.category_id == Some(kept.id)).unwrap();
    assert_eq!(live.count, 1);
}

#[tokio::test]
#[ignore]
async fn test_news_headline_latest_and_sources() {
    let (_guard, _db, repos) = setup().await;

    let now = Utc::now();
    let campus = repos
        .news
        .create(cms_domain::news::NewNews {
            published_at: Some(now - Duration::hours(2)),
            ..new_test_news()
        })
        .await
        .unwrap();
    let wire = repos
        .news
        .create(cms_domain::news::NewNews {
            source: Some("Wire".to_string()),
            published_at: Some(now - Duration::hours(1)),
            ..new_test_news()
        })
        .await
        .unwrap();
    let unsourced = repos
        .news
        .create(cms_domain::news::NewNews {
            source: None,
            published_at: Some(now),
            ..new_test_news()
        })
        .await
        .unwrap();

    repos.news.set_headline(campus.id).await.unwrap();
    repos.news.set_headline(wire.id).await.unwrap();
    assert_eq!(repos.news.get_headline().await.unwrap().unwrap().id, wire.id);
    let headlines = NewsFilter {
        is_headline: Some(true),
        ..Default::default()
    };
    assert_eq!(repos.news.count(&headlines).await.unwrap(), 1);

    let latest: Vec<_> = repos.news.latest(2).await.unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(latest, vec![unsourced.id, wire.id]);

    assert!(repos.news.delete(campus.id).await.unwrap());
    let mut sources = repos.news.count_by_source().await.unwrap();
    sources.sort_by(|a, b| a.source.cmp(&b.source));
    assert_eq!(
        sources,
        vec![
            SourceCount { source: None, count: 1 },
            SourceCount { source: Some("Wire".to_string()), count: 1 },
        ]
    );
}

#[tokio::test]
#[ignore]
async fn test_image_library_stats() {
    let (_guard, _db, repos) = setup().await;

    let cover = repos
        .images
        .create(cms_domain::media::NewImage {
            size_bytes: 100,
            ..new_test_image(Some("campus"))
        })
        .await
        .unwrap();
    let photo = repos
        .images
        .create(cms_domain::media::NewImage {
            mime_type: "image/jpeg".to_string(),
            size_bytes: 200,
            ..new_test_image(Some("campus"))
        })
        .await
        .unwrap();
    repos
        .images
        .create(cms_domain::media::NewImage {
            size_bytes: 300,
            ..new_test_image(Some("events"))
        })
        .await
        .unwrap();

    assert_eq!(repos.images.albums().await.unwrap(), vec!["campus", "events"]);

    let stats = repos.images.storage_stats().await.unwrap();
    assert_eq!(stats.total_count, 3);
    assert_eq!(stats.total_bytes, 600);
    let png = stats.by_mime_type.iter().find(|s| s.mime_type == "image/png").unwrap();
    assert_eq!((png.count, png.total_bytes), (2, 400));
    let jpeg = stats.by_mime_type.iter().find(|s| s.mime_type == "image/jpeg").unwrap();
    assert_eq!((jpeg.count, jpeg.total_bytes), (1, 200));

    let removed = repos
        .images
        .delete_many(&[cover.id, photo.id, ImageId::new()])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(repos.images.delete_many(&[cover.id]).await.unwrap(), 0);
    assert!(repos.images.get_by_id(photo.id).await.unwrap_err().is_not_found());

    assert_eq!(repos.images.albums().await.unwrap(), vec!["events"]);
    let stats = repos.images.storage_stats().await.unwrap();
    assert_eq!((stats.total_count, stats.total_bytes), (1, 300));
}

#[tokio::test]
#[ignore]
async fn test_video_duration_counts_ready_only() {
    let (_guard, _db, repos) = setup().await;

    repos
        .videos
        .create(cms_domain::media::NewVideo {
            duration_seconds: 100,
            ..new_test_video(None)
        })
        .await
        .unwrap();
    let offline = repos
        .videos
        .create(cms_domain::media::NewVideo {
            duration_seconds: 50,
            ..new_test_video(None)
        })
        .await
        .unwrap();
    repos
        .videos
        .create(cms_domain::media::NewVideo {
            duration_seconds: 1000,
            status: VideoStatus::Processing,
            ..new_test_video(None)
        })
        .await
        .unwrap();

    assert_eq!(repos.videos.total_duration_seconds().await.unwrap(), 150);

    repos.videos.set_status(offline.id, VideoStatus::Offline).await.unwrap();
    assert_eq!(repos.videos.total_duration_seconds().await.unwrap(), 100);

    let counts = repos.videos.count_by_status().await.unwrap();
    let ready = counts.iter().find(|c| c.status == VideoStatus::Ready).unwrap();
    assert_eq!(ready.count, 1);
}

#[tokio::test]
#[ignore]
async fn test_user_uniqueness_and_credentials() {
    let (_guard, _db, repos) = setup().await;

    let suffix = unique_suffix();
    let user = repos
        .users
        .create(
            UserBuilder::new()
                .with_username(format!("Alice_{}", suffix))
                .with_email(format!("alice.{}@example.com", suffix))
                .build(),
        )
        .await
        .unwrap();

    let same_name = UserBuilder::new().with_username(format!("ALICE_{}", suffix)).build();
    let err = repos.users.create(same_name).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let same_email = UserBuilder::new()
        .with_email(format!("Alice.{}@Example.com", suffix))
        .build();
    let err = repos.users.create(same_email).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{:?}", err);

    let found = repos.users.find_by_username(&format!("alice_{}", suffix)).await.unwrap();
    assert_eq!(found.map(|u| u.id), Some(user.id));
    assert!(repos.users.email_exists(&format!("ALICE.{}@example.com", suffix)).await.unwrap());

    let credentials = repos
        .users
        .get_password_hash(&format!("alice_{}", suffix))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credentials.user_id, user.id);

    repos.users.set_status(user.id, UserStatus::Disabled).await.unwrap();
    assert!(repos
        .users
        .get_password_hash(&format!("alice_{}", suffix))
        .await
        .unwrap()
        .is_none());
}
