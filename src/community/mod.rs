//! Feedback, reviews, experiences and messages to the admin team.

mod types;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

pub use types::*;

use crate::accounts::User;
use crate::store::{new_id, Database, StoreError};

#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trimmed text must have at least `min` characters; the raw text at most
/// `max`.
fn check_length(label: &str, text: &str, min: usize, max: usize) -> Result<String, CommunityError> {
    let trimmed = text.trim();
    if trimmed.chars().count() < min {
        return Err(CommunityError::Invalid(if min <= 1 {
            format!("{} cannot be empty", label)
        } else {
            format!("{} must be at least {} characters", label, min)
        }));
    }
    if text.chars().count() > max {
        return Err(CommunityError::Invalid(format!(
            "{} too long (max {} characters)",
            label, max
        )));
    }
    Ok(trimmed.to_string())
}

fn newest_first<T, F>(items: &mut [T], created_at: F)
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}

pub async fn send_feedback(
    db: &Database,
    user: &User,
    walk_id: &str,
    message: &str,
) -> Result<Feedback, CommunityError> {
    let walk = db
        .walks
        .get(walk_id)
        .await
        .ok_or(CommunityError::NotFound("Walk"))?;
    if walk.organizer_id == user.user_id {
        return Err(CommunityError::Invalid(
            "Cannot send feedback to yourself".to_string(),
        ));
    }
    let message = check_length("Message", message, 5, 2000)?;

    let feedback = Feedback {
        feedback_id: new_id("feedback"),
        walk_id: walk.walk_id,
        walk_title: walk.title,
        from_user_id: user.user_id.clone(),
        from_user_name: user.display_name().to_string(),
        to_organizer_id: walk.organizer_id,
        to_organizer_name: walk.organizer_name,
        message,
        created_at: Utc::now(),
        replies: Vec::new(),
    };
    let feedback = db.feedback.insert(feedback).await?;
    tracing::info!(
        feedback_id = %feedback.feedback_id,
        from = %feedback.from_user_id,
        to = %feedback.to_organizer_id,
        "Feedback sent"
    );
    Ok(feedback)
}

pub async fn feedback_sent(db: &Database, user_id: &str) -> Vec<Feedback> {
    let mut items = db.feedback.find(|f| f.from_user_id == user_id).await;
    newest_first(&mut items, |f| f.created_at);
    items
}

pub async fn feedback_received(db: &Database, user_id: &str) -> Vec<Feedback> {
    let mut items = db.feedback.find(|f| f.to_organizer_id == user_id).await;
    newest_first(&mut items, |f| f.created_at);
    items
}

/// Append a reply. Only the sender and the organizer take part in a thread.
pub async fn reply_to_feedback(
    db: &Database,
    user: &User,
    feedback_id: &str,
    message: &str,
) -> Result<FeedbackReply, CommunityError> {
    let feedback = db
        .feedback
        .get(feedback_id)
        .await
        .ok_or(CommunityError::NotFound("Feedback"))?;
    if user.user_id != feedback.to_organizer_id && user.user_id != feedback.from_user_id {
        return Err(CommunityError::Forbidden(
            "You can only reply to feedback you received or sent",
        ));
    }
    let message = check_length("Reply message", message, 1, 1000)?;

    let reply = FeedbackReply {
        reply_id: new_id("reply"),
        feedback_id: feedback_id.to_string(),
        from_user_id: user.user_id.clone(),
        from_user_name: user.display_name().to_string(),
        message,
        created_at: Utc::now(),
    };
    let stored = reply.clone();
    db.feedback
        .update(feedback_id, move |f| f.replies.push(stored))
        .await?
        .ok_or(CommunityError::NotFound("Feedback"))?;
    Ok(reply)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub walk_id: String,
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One review per user and walk, only for walks the user booked.
pub async fn create_review(
    db: &Database,
    user: &User,
    new: NewReview,
) -> Result<WalkReview, CommunityError> {
    if !(1..=5).contains(&new.rating) {
        return Err(CommunityError::Invalid(
            "Rating must be between 1 and 5".to_string(),
        ));
    }
    let walk = db
        .walks
        .get(&new.walk_id)
        .await
        .ok_or(CommunityError::NotFound("Walk"))?;

    let booked = db
        .bookings
        .find_one(|b| b.walk_id == new.walk_id && b.user_id == user.user_id)
        .await;
    if booked.is_none() {
        return Err(CommunityError::Forbidden(
            "You can only review walks you have booked",
        ));
    }
    let review = WalkReview {
        review_id: new_id("review"),
        walk_id: walk.walk_id,
        walk_title: walk.title,
        user_id: user.user_id.clone(),
        user_name: user.display_name().to_string(),
        rating: new.rating as u8,
        comment: new
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        created_at: Utc::now(),
    };
    let review = db
        .reviews
        .insert_if(review, |mut existing| {
            if existing.any(|r| r.walk_id == new.walk_id && r.user_id == user.user_id) {
                Err(CommunityError::Invalid(
                    "You have already reviewed this walk".to_string(),
                ))
            } else {
                Ok(())
            }
        })
        .await?;
    Ok(review)
}

pub async fn reviews_by(db: &Database, user_id: &str) -> Vec<WalkReview> {
    let mut items = db.reviews.find(|r| r.user_id == user_id).await;
    newest_first(&mut items, |r| r.created_at);
    items
}

pub async fn reviews_for_walk(db: &Database, walk_id: &str) -> Vec<WalkReview> {
    let mut items = db.reviews.find(|r| r.walk_id == walk_id).await;
    newest_first(&mut items, |r| r.created_at);
    items
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewExperience {
    #[serde(default)]
    pub walk_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
}

pub async fn share_experience(
    db: &Database,
    user: &User,
    new: NewExperience,
) -> Result<WalkerExperience, CommunityError> {
    let text = check_length("Experience text", &new.text, 5, 2000)?;

    let walk_title = match new.walk_id.as_deref() {
        Some(id) => db.walks.get(id).await.map(|w| w.title),
        None => None,
    };

    let experience = WalkerExperience {
        experience_id: new_id("exp"),
        user_id: user.user_id.clone(),
        user_name: user.display_name().to_string(),
        user_pseudonym: user.pseudonym.clone(),
        user_city: user.city.clone(),
        user_picture: user.picture.clone(),
        walk_id: new.walk_id,
        walk_title,
        text,
        photo: new.photo,
        video: new.video,
        created_at: Utc::now(),
        is_visible: true,
        visibility_updated_at: None,
        visibility_updated_by: None,
        visibility_reason: None,
    };
    Ok(db.experiences.insert(experience).await?)
}

const EXPERIENCE_FEED_LIMIT: usize = 100;

/// Admins see every experience. Everyone else sees visible experiences
/// from their own city, and nothing without a city.
pub async fn experience_feed(db: &Database, user: &User, is_admin: bool) -> Vec<WalkerExperience> {
    let mut items = if is_admin {
        db.experiences.all().await
    } else {
        match user.city.as_deref().filter(|c| !c.is_empty()) {
            Some(city) => {
                db.experiences
                    .find(|e| e.is_visible && e.user_city.as_deref() == Some(city))
                    .await
            }
            None => Vec::new(),
        }
    };
    newest_first(&mut items, |e| e.created_at);
    items.truncate(EXPERIENCE_FEED_LIMIT);
    items
}

pub async fn experiences_of(db: &Database, user_id: &str) -> Vec<WalkerExperience> {
    let mut items = db.experiences.find(|e| e.user_id == user_id).await;
    newest_first(&mut items, |e| e.created_at);
    items.truncate(EXPERIENCE_FEED_LIMIT);
    items
}

pub async fn record_admin_message(
    db: &Database,
    user: &User,
    message: &str,
) -> Result<AdminMessage, CommunityError> {
    let message = check_length("Message", message, 10, 1000)?;
    let msg = AdminMessage {
        message_id: new_id("msg"),
        from_user_id: user.user_id.clone(),
        from_user_name: user.name.clone(),
        from_user_email: user.email.clone(),
        message,
        created_at: Utc::now(),
        read: false,
        read_at: None,
    };
    Ok(db.admin_messages.insert(msg).await?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReport {
    pub content_type: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub reported_user_name: Option<String>,
    #[serde(default)]
    pub walk_title: Option<String>,
    #[serde(default)]
    pub walk_date: Option<String>,
    pub description: String,
}

pub async fn report_content(
    db: &Database,
    user: &User,
    new: NewReport,
) -> Result<ContentReport, CommunityError> {
    let description = check_length("Description", &new.description, 10, 2000)?;
    let report = ContentReport {
        report_id: new_id("rpt"),
        reporter_user_id: user.user_id.clone(),
        reporter_user_name: user.name.clone(),
        reporter_user_email: user.email.clone(),
        content_type: new.content_type,
        content_id: new.content_id,
        reported_user_name: new.reported_user_name,
        walk_title: new.walk_title,
        walk_date: new.walk_date,
        description,
        created_at: Utc::now(),
        status: ReportStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
    };
    let report = db.content_reports.insert(report).await?;
    tracing::info!(
        report_id = %report.report_id,
        content_type = %report.content_type,
        reporter = %report.reporter_user_id,
        "Content reported"
    );
    Ok(report)
}

/// HTML body of the email admins receive for a new message.
pub fn admin_message_email(msg: &AdminMessage) -> (String, String) {
    let subject = format!("WalkWithUs - New Message from {}", msg.from_user_name);
    let body = format!(
        "<h2>New Message from App User</h2>\
         <p><strong>From:</strong> {}</p>\
         <p><strong>Email:</strong> {}</p>\
         <p><strong>Date:</strong> {}</p>\
         <hr><p><strong>Message:</strong></p>\
         <p style=\"background-color: #f5f5f5; padding: 15px; border-radius: 5px;\">{}</p>\
         <hr><p><em>This message was sent via the WalkWithUs app contact form.</em></p>",
        msg.from_user_name,
        msg.from_user_email,
        msg.created_at.format("%Y-%m-%d %H:%M"),
        msg.message
    );
    (subject, body)
}

/// HTML body of the email admins receive for a new content report.
pub fn content_report_email(report: &ContentReport) -> (String, String) {
    let subject = format!(
        "🚨 WalkWithUs - Content Report from {}",
        report.reporter_user_name
    );
    let mut details = String::new();
    for (label, value) in [
        ("Reported User", &report.reported_user_name),
        ("Walk Title", &report.walk_title),
        ("Walk Date", &report.walk_date),
    ] {
        if let Some(value) = value {
            details.push_str(&format!("<p><strong>{}:</strong> {}</p>", label, value));
        }
    }
    let body = format!(
        "<h2>🚨 Non-Compliant Content Report</h2>\
         <p><strong>Reported by:</strong> {}</p>\
         <p><strong>Reporter Email:</strong> {}</p>\
         <p><strong>Content Type:</strong> {}</p>\
         <p><strong>Date:</strong> {}</p>{}\
         <hr><p><strong>Report Description:</strong></p>\
         <p style=\"background-color: #fff3cd; padding: 15px; border-radius: 5px; border-left: 4px solid #ffc107;\">{}</p>\
         <hr><p><em>This report requires admin review. Please check the reported content in the admin panel.</em></p>",
        report.reporter_user_name,
        report.reporter_user_email,
        report.content_type,
        report.created_at.format("%Y-%m-%d %H:%M"),
        details,
        report.description
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walks::test_support::{user_in, walk_in};
    use crate::walks;

    #[tokio::test]
    async fn test_feedback_thread() {
        let db = Database::in_memory();
        let walk = db.walks.insert(walk_in("Lyon", "org")).await.unwrap();
        let organizer = user_in("org", "Lyon");
        let mut walker = user_in("walker", "Lyon");
        walker.pseudonym = Some("Strider".to_string());
        let outsider = user_in("outsider", "Lyon");

        assert!(matches!(
            send_feedback(&db, &organizer, &walk.walk_id, "Great walk!").await,
            Err(CommunityError::Invalid(_))
        ));
        assert!(matches!(
            send_feedback(&db, &walker, &walk.walk_id, "  hi  ").await,
            Err(CommunityError::Invalid(_))
        ));

        let fb = send_feedback(&db, &walker, &walk.walk_id, "  Lovely route  ")
            .await
            .unwrap();
        assert_eq!(fb.message, "Lovely route");
        assert_eq!(fb.from_user_name, "Strider");

        reply_to_feedback(&db, &organizer, &fb.feedback_id, "Thanks!")
            .await
            .unwrap();
        assert!(matches!(
            reply_to_feedback(&db, &outsider, &fb.feedback_id, "me too").await,
            Err(CommunityError::Forbidden(_))
        ));
        assert!(matches!(
            reply_to_feedback(&db, &walker, &fb.feedback_id, "   ").await,
            Err(CommunityError::Invalid(_))
        ));

        let received = feedback_received(&db, "org").await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].replies.len(), 1);
        assert_eq!(feedback_sent(&db, "walker").await.len(), 1);
    }

    #[tokio::test]
    async fn test_review_rules() {
        let db = Database::in_memory();
        let walk = db.walks.insert(walk_in("Lyon", "org")).await.unwrap();
        let walker = user_in("walker", "Lyon");

        let review = |rating| NewReview {
            walk_id: walk.walk_id.clone(),
            rating,
            comment: Some("  nice ".to_string()),
        };

        assert!(matches!(
            create_review(&db, &walker, review(6)).await,
            Err(CommunityError::Invalid(_))
        ));
        assert!(matches!(
            create_review(&db, &walker, review(4)).await,
            Err(CommunityError::Forbidden(_))
        ));

        walks::book(&db, &walk.walk_id, &walker).await.unwrap();
        let created = create_review(&db, &walker, review(4)).await.unwrap();
        assert_eq!(created.comment.as_deref(), Some("nice"));
        assert!(matches!(
            create_review(&db, &walker, review(5)).await,
            Err(CommunityError::Invalid(_))
        ));
        assert_eq!(reviews_for_walk(&db, &walk.walk_id).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reviews_of_one_walk() {
        let temp = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(Database::open(temp.path()).await.unwrap());
        let walk = db.walks.insert(walk_in("Lyon", "org")).await.unwrap();
        let walker = user_in("walker", "Lyon");
        walks::book(&db, &walk.walk_id, &walker).await.unwrap();

        let mut handles = Vec::new();
        for rating in [1, 2, 3, 4, 5, 5, 4, 3] {
            let db = std::sync::Arc::clone(&db);
            let walker = walker.clone();
            let new = NewReview {
                walk_id: walk.walk_id.clone(),
                rating,
                comment: None,
            };
            handles.push(tokio::spawn(async move {
                create_review(&db, &walker, new).await.is_ok()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(reviews_for_walk(&db, &walk.walk_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_experience_feed_visibility() {
        let db = Database::in_memory();
        let lyon = user_in("lyon", "Lyon");
        let paris = user_in("paris", "Paris");
        let nowhere = User::new_email("n", "n@example.com", "N", None);

        let text = |t: &str| NewExperience {
            walk_id: None,
            text: t.to_string(),
            photo: None,
            video: None,
        };
        let shown = share_experience(&db, &lyon, text("Sunny loop by the river"))
            .await
            .unwrap();
        let hidden = share_experience(&db, &lyon, text("Another lovely morning"))
            .await
            .unwrap();
        share_experience(&db, &paris, text("Seine at dusk")).await.unwrap();
        db.experiences
            .update(&hidden.experience_id, |e| e.is_visible = false)
            .await
            .unwrap();

        let feed = experience_feed(&db, &lyon, false).await;
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].experience_id, shown.experience_id);

        assert!(experience_feed(&db, &nowhere, false).await.is_empty());
        assert_eq!(experience_feed(&db, &nowhere, true).await.len(), 3);
        assert_eq!(experiences_of(&db, "lyon").await.len(), 2);
    }

    #[tokio::test]
    async fn test_admin_message_and_report_lengths() {
        let db = Database::in_memory();
        let user = user_in("u", "Lyon");
        assert!(record_admin_message(&db, &user, "too short").await.is_err());
        let msg = record_admin_message(&db, &user, "Please add walks in Villeurbanne")
            .await
            .unwrap();
        assert!(!msg.read);
        let (subject, body) = admin_message_email(&msg);
        assert!(subject.contains(&user.name));
        assert!(body.contains("Villeurbanne"));

        let report = report_content(
            &db,
            &user,
            NewReport {
                content_type: "experience".to_string(),
                content_id: Some("exp_1".to_string()),
                reported_user_name: Some("Troll".to_string()),
                walk_title: None,
                walk_date: None,
                description: "Offensive language in the post".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        let (_, body) = content_report_email(&report);
        assert!(body.contains("Reported User:</strong> Troll"));
        assert!(!body.contains("Walk Title"));
    }

    #[test]
    fn test_moderation_entry_shape() {
        let entry = ModerationEntry {
            entry_id: "mod_1".to_string(),
            action: ModerationAction::ExperienceVisibilityChange {
                experience_id: "exp_1".to_string(),
                experience_user_id: "u".to_string(),
                new_visibility: false,
                reason: None,
            },
            admin_id: "admin".to_string(),
            admin_email: "admin@example.com".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "experience_visibility_change");
        assert_eq!(json["new_visibility"], false);

        let back: ModerationEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.action, entry.action);
    }
}
