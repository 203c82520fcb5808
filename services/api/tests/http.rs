//! End-to-end tests of the HTTP surface over the in-memory ports.

use autorfp_api::config::Config;
use autorfp_api::web::{router, state::AppState};
use autorfp_core::domain::Role;
use autorfp_core::pipeline::{
    ExtractedQuestion, ExtractedQuestionnaire, ExtractedSection, GenerationStage,
};
use autorfp_core::ports::{DatabaseService, PortError};
use autorfp_core::testing::{InMemoryDatabase, ScriptedExtractor, ScriptedGenerator, StaticParser};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    db: Arc<InMemoryDatabase>,
    app: Router,
}

fn questionnaire() -> ExtractedQuestionnaire {
    ExtractedQuestionnaire {
        sections: vec![ExtractedSection {
            id: "section_1".to_string(),
            title: "Security".to_string(),
            description: None,
            questions: vec![
                ExtractedQuestion {
                    id: "q_1_1".to_string(),
                    text: "Do you support single sign-on?".to_string(),
                    answer: None,
                },
                ExtractedQuestion {
                    id: "q_1_2".to_string(),
                    text: "Is customer data encrypted at rest?".to_string(),
                    answer: None,
                },
            ],
        }],
    }
}

fn build(extractor: ScriptedExtractor, generator: ScriptedGenerator) -> TestApp {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused".to_string()),
        _ => None,
    })
    .unwrap();
    let db = Arc::new(InMemoryDatabase::new());
    let state = Arc::new(AppState {
        db: db.clone(),
        config: Arc::new(config),
        parser: Arc::new(StaticParser::new("1. Do you support single sign-on?")),
        extractor: Arc::new(extractor),
        generator: Arc::new(generator),
    });
    TestApp {
        db,
        app: router(state),
    }
}

fn test_app() -> TestApp {
    build(
        ScriptedExtractor::returning(questionnaire()),
        ScriptedGenerator::answering("Yes, via SAML 2.0 and OIDC."),
    )
}

impl TestApp {
    /// Creates a user with a live session and returns its id and cookie.
    async fn signed_in(&self, email: &str) -> (Uuid, String) {
        let user_id = self.db.seed_user(email).await;
        let session_id = Uuid::new_v4().to_string();
        self.db
            .create_auth_session(&session_id, user_id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        (user_id, format!("session={}", session_id))
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.call(request).await
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, set_cookie, body)
    }
}

fn session_of(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let t = test_app();
    let (status, _, body) = t.send("GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "data": { "status": "ok" } }));
}

#[tokio::test]
async fn signup_login_and_logout_manage_the_session_cookie() {
    let t = test_app();
    let credentials = json!({ "email": "ada@example.com", "password": "correct horse" });

    let (status, cookie, body) = t
        .send("POST", "/api/auth/signup", None, Some(credentials.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["email"], "ada@example.com");
    let cookie = session_of(&cookie.expect("signup sets a cookie"));

    let (status, _, body) = t.send("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "ada@example.com");

    let (status, _, body) = t
        .send("POST", "/api/auth/signup", None, Some(credentials.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, cleared, _) = t.send("POST", "/api/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cleared.unwrap().contains("Max-Age=0"));
    let (status, _, _) = t.send("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = json!({ "email": "ada@example.com", "password": "wrong password" });
    let (status, _, body) = t.send("POST", "/api/auth/login", None, Some(wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, cookie, _) = t.send("POST", "/api/auth/login", None, Some(credentials)).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = session_of(&cookie.expect("login sets a cookie"));
    let (status, _, _) = t.send("GET", "/api/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_sessions_with_the_error_envelope() {
    let t = test_app();
    let (status, _, body) = t.send("GET", "/api/organizations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
    assert!(body["message"].is_string());

    let (status, _, _) = t
        .send("GET", "/api/organizations", Some("session=forged"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_bodies_are_validation_errors() {
    let t = test_app();
    let (_, cookie) = t.signed_in("owner@example.com").await;

    let (status, _, body) = t
        .send("POST", "/api/organizations", Some(&cookie), Some(json!({ "name": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _, body) = t
        .send("POST", "/api/organizations", Some(&cookie), Some(json!({ "title": "Acme" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn malformed_path_ids_are_validation_errors() {
    let t = test_app();
    let (_, cookie) = t.signed_in("owner@example.com").await;

    let (status, _, body) = t
        .send("GET", "/api/projects/not-a-uuid", Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].is_string());

    let uri = format!("/api/knowledge-bases/{}/questions/42", Uuid::new_v4());
    let (status, _, body) = t.send("DELETE", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn organization_creator_becomes_owner() {
    let t = test_app();
    let (user_id, cookie) = t.signed_in("owner@example.com").await;

    let (status, _, body) = t
        .send(
            "POST",
            "/api/organizations",
            Some(&cookie),
            Some(json!({ "name": "Acme Corp" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["slug"], "acme-corp");
    assert_eq!(body["data"]["role"], "owner");
    let org_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = t
        .send("GET", &format!("/api/organizations/{}/members", org_id), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let members = body["data"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["user"]["id"], user_id.to_string());
    assert_eq!(members[0]["role"], "owner");
}

#[tokio::test]
async fn outsiders_are_forbidden() {
    let t = test_app();
    let (owner, _) = t.signed_in("owner@example.com").await;
    let (_, outsider) = t.signed_in("outsider@example.com").await;
    let (org, project) = t.db.seed_project(owner).await;

    let (status, _, body) = t
        .send("GET", &format!("/api/projects/{}", project.id), Some(&outsider), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _, _) = t
        .send("GET", &format!("/api/organizations/{}", org.id), Some(&outsider), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn project_in_missing_organization_is_not_found_and_not_created() {
    let t = test_app();
    let (_, cookie) = t.signed_in("owner@example.com").await;
    let before = t.db.project_count();

    let (status, _, body) = t
        .send(
            "POST",
            "/api/projects",
            Some(&cookie),
            Some(json!({ "organization_id": Uuid::new_v4(), "name": "Ghost RFP" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert_eq!(t.db.project_count(), before);
}

#[tokio::test]
async fn last_owner_cannot_leave_or_step_down() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (org, _) = t.db.seed_project(owner).await;
    let member_uri = format!("/api/organizations/{}/members/{}", org.id, owner);

    let (status, _, body) = t.send("DELETE", &member_uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _, _) = t
        .send("PATCH", &member_uri, Some(&cookie), Some(json!({ "role": "member" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, body) = t
        .send("GET", &format!("/api/organizations/{}", org.id), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "owner");
}

#[tokio::test]
async fn admins_cannot_grant_ownership() {
    let t = test_app();
    let (owner, _) = t.signed_in("owner@example.com").await;
    let (admin, admin_cookie) = t.signed_in("admin@example.com").await;
    let member = t.db.seed_user("member@example.com").await;
    let (org, _) = t.db.seed_project(owner).await;
    t.db.add_member(org.id, admin, Role::Admin).await.unwrap();
    t.db.add_member(org.id, member, Role::Member).await.unwrap();

    let uri = format!("/api/organizations/{}/members/{}", org.id, member);
    let (status, _, _) = t
        .send("PATCH", &uri, Some(&admin_cookie), Some(json!({ "role": "owner" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = t
        .send("PATCH", &uri, Some(&admin_cookie), Some(json!({ "role": "admin" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "admin");

    let (status, _, body) = t
        .send("PATCH", &uri, Some(&admin_cookie), Some(json!({ "role": "root" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn members_are_added_by_email() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    t.db.seed_user("new@example.com").await;
    let (org, _) = t.db.seed_project(owner).await;
    let uri = format!("/api/organizations/{}/members", org.id);

    let (status, _, body) = t
        .send("POST", &uri, Some(&cookie), Some(json!({ "email": "new@example.com" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["role"], "member");

    let (status, _, _) = t
        .send("POST", &uri, Some(&cookie), Some(json!({ "email": "new@example.com" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = t
        .send("POST", &uri, Some(&cookie), Some(json!({ "email": "nobody@example.com" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_knowledge_base_question_removes_its_answer() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (org, _) = t.db.seed_project(owner).await;

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/organizations/{}/knowledge-bases", org.id),
            Some(&cookie),
            Some(json!({ "name": "Security answers" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let kb_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/knowledge-bases/{}/questions", kb_id),
            Some(&cookie),
            Some(json!({
                "text": "Do you support SSO?",
                "tags": ["SSO", "auth"],
                "answer": "Yes, via SAML."
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tags"], json!(["sso", "auth"]));
    assert_eq!(body["data"]["answer"]["text"], "Yes, via SAML.");
    assert_eq!(t.db.knowledge_base_answer_count(), 1);
    let question_uri = format!(
        "/api/knowledge-bases/{}/questions/{}",
        kb_id,
        body["data"]["id"].as_str().unwrap()
    );

    let (status, _, body) = t
        .send("PATCH", &question_uri, Some(&cookie), Some(json!({ "topic": "Identity" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["answer"]["text"], "Yes, via SAML.");

    let (status, _, _) = t.send("DELETE", &question_uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.db.knowledge_base_answer_count(), 0);
}

#[tokio::test]
async fn extraction_then_generation_saves_an_answer() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (_, project) = t.db.seed_project(owner).await;

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/projects/{}/extract-questions", project.id),
            Some(&cookie),
            Some(json!({ "document_name": "rfp.txt", "content": "1. Do you support SSO?" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let extracted = body["data"].as_array().unwrap();
    assert_eq!(extracted.len(), 2);
    assert_eq!(extracted[0]["reference_id"], "q_1_1");
    let question_id = extracted[0]["id"].as_str().unwrap().to_string();

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/questions/{}/generate", question_id),
            Some(&cookie),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["answer"]["text"], "Yes, via SAML 2.0 and OIDC.");
    assert_eq!(body["data"]["stages"].as_array().unwrap().len(), 5);
    assert_eq!(body["data"]["stages"][0]["stage"], "analyze_question");
    assert_eq!(t.db.answer_count(), 1);

    let (status, _, body) = t
        .send("GET", &format!("/api/projects/{}/questions", project.id), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["answer"]["text"], "Yes, via SAML 2.0 and OIDC.");
    assert!(body["data"][1]["answer"].is_null());
}

#[tokio::test]
async fn failed_generation_stage_is_a_bad_gateway_and_saves_nothing() {
    let t = build(
        ScriptedExtractor::returning(questionnaire()),
        ScriptedGenerator::answering("unused").failing_at(GenerationStage::ExtractInformation),
    );
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (_, project) = t.db.seed_project(owner).await;
    let (_, _, body) = t
        .send(
            "POST",
            &format!("/api/projects/{}/extract-questions", project.id),
            Some(&cookie),
            Some(json!({ "document_name": "rfp.txt", "content": "1. Do you support SSO?" })),
        )
        .await;
    let question_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/questions/{}/generate", question_id),
            Some(&cookie),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "external_service_error");
    assert_eq!(t.db.answer_count(), 0);
}

#[tokio::test]
async fn free_text_generation_is_not_stored() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (_, project) = t.db.seed_project(owner).await;

    let (status, _, body) = t
        .send(
            "POST",
            "/api/generate-response",
            Some(&cookie),
            Some(json!({ "project_id": project.id, "question": "Do you support SSO?" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["answer"], "Yes, via SAML 2.0 and OIDC.");
    assert_eq!(body["data"]["validation"]["is_valid"], true);
    assert_eq!(t.db.answer_count(), 0);
}

#[tokio::test]
async fn extraction_failures_surface_as_external_errors() {
    let t = build(
        ScriptedExtractor::failing(PortError::External("model timed out".to_string())),
        ScriptedGenerator::answering("unused"),
    );
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (_, project) = t.db.seed_project(owner).await;

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/projects/{}/extract-questions", project.id),
            Some(&cookie),
            Some(json!({ "document_name": "rfp.txt", "content": "1. Do you support SSO?" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);

    let (_, _, body) = t
        .send("GET", &format!("/api/projects/{}/questions", project.id), Some(&cookie), None)
        .await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn uploaded_documents_are_parsed_and_listed() {
    let t = test_app();
    let (owner, cookie) = t.signed_in("owner@example.com").await;
    let (_, project) = t.db.seed_project(owner).await;

    let boundary = "autorfp-boundary";
    let payload = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"rfp.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n%PDF-1.4 fake\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/projects/{}/documents", project.id))
        .header(header::COOKIE, &cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(payload))
        .unwrap();
    let (status, _, body) = t.call(request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["file_name"], "rfp.pdf");
    assert_eq!(body["data"]["content"], "1. Do you support single sign-on?");
    let document_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = t
        .send("GET", &format!("/api/projects/{}/documents", project.id), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], document_id);
    assert!(body["data"][0].get("content").is_none());

    let (status, _, body) = t
        .send(
            "POST",
            &format!("/api/projects/{}/extract-questions", project.id),
            Some(&cookie),
            Some(json!({ "document_id": document_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
