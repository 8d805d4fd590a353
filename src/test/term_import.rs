#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::test::test_utils::{
        create_standard_test_db, login_as, post_form, post_multipart, setup_test_client,
        setup_test_client_with,
    };
    use rocket::data::ToByteUnit;
    use rocket::http::Status;

    const HEADER: &str = "term_code,term_name,start_date,end_date,is_active\n";

    fn bulk_file(rows: usize) -> String {
        let mut data = HEADER.to_string();
        for i in 0..rows {
            data.push_str(&format!(
                "B{i:03},Bulk imported term number {i} for the catalogue,2030-01-01,2030-05-01,1\n"
            ));
        }
        data
    }

    const MIXED_FILE: &str = "term_code,term_name,start_date,end_date,is_active
fa25,Fall 2025 (revised),2025-08-27,2025-12-19,yes
SU26,Summer 2026,2026-06-01,2026-08-07,
WI26,Winter 2026,2026-02-30,2026-03-20,1
XX26,Backwards,2026-05-01,2026-04-01,0
FL26,Fall 2026,2026-08-24,2026-12-14,inactive
";

    #[rocket::async_test]
    async fn test_import_applies_valid_rows_and_reports_bad_ones() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let response = post_form(
            &client,
            &session,
            "/admin/terms/import",
            &[("file", MIXED_FILE)],
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("page body");
        assert!(body.contains("Import complete: 2 inserted, 1 updated."));
        assert!(body.contains("2 row(s) rejected"));
        assert!(body.contains("Row 4:"));
        assert!(body.contains("Row 5:"));

        // Two seeded terms, two inserted, FA25 updated in place.
        assert_eq!(test_db.count("terms").await, 4);

        let (name, end): (String, String) =
            sqlx::query_as("SELECT term_name, end_date FROM terms WHERE term_code = 'FA25'")
                .fetch_one(&test_db.pool)
                .await
                .expect("FA25 row");
        assert_eq!(name, "Fall 2025 (revised)");
        assert_eq!(end, "2025-12-19");

        let active: bool =
            sqlx::query_scalar("SELECT is_active FROM terms WHERE term_code = 'FL26'")
                .fetch_one(&test_db.pool)
                .await
                .expect("FL26 row");
        assert!(!active);
    }

    #[rocket::async_test]
    async fn test_wrong_header_rejects_file() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let response = post_form(
            &client,
            &session,
            "/admin/terms/import",
            &[("file", "code,name\nSU26,Summer 2026\n")],
        )
        .await;

        let body = response.into_string().await.expect("page body");
        assert!(body.contains("alert-danger"));
        assert_eq!(test_db.count("terms").await, 2);
    }

    #[rocket::async_test]
    async fn test_import_requires_csrf_and_permission() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let viewer = login_as(&client, "viewer").await;
        let response = post_form(&client, &viewer, "/admin/terms/import", &[("file", MIXED_FILE)]).await;
        assert_eq!(response.status(), Status::Forbidden);

        let mut coordinator = login_as(&client, "coordinator").await;
        coordinator.csrf_token = "forged".to_string();
        let response =
            post_form(&client, &coordinator, "/admin/terms/import", &[("file", MIXED_FILE)]).await;
        assert_eq!(response.status(), Status::Forbidden);

        assert_eq!(test_db.count("terms").await, 2);
    }

    #[rocket::async_test]
    async fn test_multipart_upload_imports_file() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let response = post_multipart(
            &client,
            &session,
            "/admin/terms/import",
            &[],
            ("file", "terms.csv", MIXED_FILE),
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("page body");
        assert!(body.contains("Import complete: 2 inserted, 1 updated."));
        assert_eq!(test_db.count("terms").await, 4);
    }

    #[rocket::async_test]
    async fn test_multipart_upload_larger_than_string_limit() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let data = bulk_file(200);
        assert!(data.len() > 8 * 1024);

        let response = post_multipart(
            &client,
            &session,
            "/admin/terms/import",
            &[],
            ("file", "terms.csv", &data),
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("page body");
        assert!(body.contains("Import complete: 200 inserted, 0 updated."));
        assert_eq!(test_db.count("terms").await, 202);
    }

    #[rocket::async_test]
    async fn test_upload_over_file_limit_is_refused() {
        let figment = AppConfig::figment().merge(("limits.file", 1.kibibytes()));
        let (client, test_db) =
            setup_test_client_with(create_standard_test_db().await, figment).await;
        let session = login_as(&client, "coordinator").await;

        let response = post_multipart(
            &client,
            &session,
            "/admin/terms/import",
            &[],
            ("file", "terms.csv", &bulk_file(40)),
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("page body");
        assert!(body.contains("alert-danger"));
        assert!(body.contains("larger than the"));
        assert!(!body.contains("Choose a CSV file"));
        assert_eq!(test_db.count("terms").await, 2);
    }

    #[rocket::async_test]
    async fn test_empty_upload_asks_for_a_file() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let response = post_multipart(
            &client,
            &session,
            "/admin/terms/import",
            &[],
            ("file", "empty.csv", ""),
        )
        .await;

        let body = response.into_string().await.expect("page body");
        assert!(body.contains("Choose a CSV file to import."));
        assert_eq!(test_db.count("terms").await, 2);
    }

    #[rocket::async_test]
    async fn test_terms_page_offers_upload_form() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let session = login_as(&client, "coordinator").await;

        let response = client
            .get("/admin/terms")
            .cookies(session.cookies.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.expect("page body");
        assert!(body.contains(r#"action="/admin/terms/import" enctype="multipart/form-data""#));
        assert!(body.contains(r#"type="file" name="file""#));

        let response = client
            .get("/admin/students")
            .cookies(session.cookies)
            .dispatch()
            .await;
        let body = response.into_string().await.expect("page body");
        assert!(!body.contains("multipart/form-data"));
    }
}
