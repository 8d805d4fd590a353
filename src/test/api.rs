#[cfg(test)]
mod tests {
    use crate::api::{LoginResponse, UserData};
    use crate::auth::Role;
    use crate::test::test_db::TestDbBuilder;
    use crate::test::test_utils::{
        create_standard_test_db, login_as, login_test_user, setup_test_client,
    };
    use rocket::http::{ContentType, Cookie, Status};
    use serde_json::json;

    async fn attempt(client: &rocket::local::asynchronous::Client, username: &str, password: &str) -> (Status, String) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "password": password }).to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_string().await.unwrap_or_default())
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let (status, body) = attempt(&client, "coordinator", "password123").await;
        assert_eq!(status, Status::Ok);
        let login: LoginResponse = serde_json::from_str(&body).unwrap();
        assert!(login.success);
        let user = login.user.unwrap();
        assert_eq!(user.username, "coordinator");
        assert_eq!(user.role, "coordinator");
        assert!(!user.csrf_token.is_empty());

        let (status, body) = attempt(&client, "coordinator", "wrong_password").await;
        assert_eq!(status, Status::Ok);
        let login: LoginResponse = serde_json::from_str(&body).unwrap();
        assert!(!login.success);
        assert!(login.user.is_none());
        assert_eq!(login.error.as_deref(), Some("Invalid username or password"));
    }

    #[rocket::async_test]
    async fn test_login_validates_payload() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let (status, _) = attempt(&client, "", "").await;
        assert_eq!(status, Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn test_inactive_user_cannot_log_in() {
        let test_db = TestDbBuilder::new()
            .inactive_user("former", Role::Coordinator)
            .build()
            .await
            .expect("Failed to build test DB");
        let (client, _) = setup_test_client(test_db).await;

        let (_, body) = attempt(&client, "former", "password123").await;
        let login: LoginResponse = serde_json::from_str(&body).unwrap();
        assert!(!login.success);
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        for endpoint in ["/api/me", "/data/students", "/data/terms"] {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
        }
    }

    #[rocket::async_test]
    async fn test_api_session_security() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let forged_cookie = Cookie::build(("session_token", "fake_token")).build();
        let response = client
            .get("/api/me")
            .private_cookie(forged_cookie)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let session = login_as(&client, "viewer").await;
        let response = client.get("/api/me").cookies(session.cookies).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_me_api() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let session = login_test_user(&client, "admin", "password123").await;

        let response = client
            .get("/api/me")
            .cookies(session.cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let user: UserData = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(user.username, "admin");
        assert_eq!(user.email, "admin@example.edu");
        assert_eq!(user.role, "admin");
        assert_eq!(user.csrf_token, session.csrf_token);
    }

    #[rocket::async_test]
    async fn test_logout_ends_session() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "viewer").await;
        assert_eq!(test_db.count("user_sessions").await, 1);

        let response = client
            .post("/api/logout")
            .cookies(session.cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(test_db.count("user_sessions").await, 0);

        let response = client.get("/api/me").cookies(session.cookies).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_health() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.as_deref(), Some("OK"));
    }
}
