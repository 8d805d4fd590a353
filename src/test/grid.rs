#[cfg(test)]
mod tests {
    use crate::test::test_db::TestDbBuilder;
    use crate::test::test_utils::{
        create_standard_test_db, get_grid, login_as, setup_test_client,
    };
    use rocket::http::Status;
    use serde_json::Value;

    async fn student_db() -> crate::test::test_db::TestDb {
        TestDbBuilder::new()
            .admin("admin")
            .viewer("viewer")
            .catalog()
            .student("S002", "Alan", "Turing")
            .inactive_student("S003", "Grace", "Hopper")
            .build()
            .await
            .expect("Failed to build test DB")
    }

    fn column(data: &[Vec<String>], index: usize) -> Vec<&str> {
        data.iter().map(|row| row[index].as_str()).collect()
    }

    #[rocket::async_test]
    async fn test_search_narrows_filtered_count_only() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let response = get_grid(&client, &session, "/data/students?draw=3&search%5Bvalue%5D=lovelace").await;

        assert_eq!(response.draw, 3);
        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 1);
        assert_eq!(column(&response.data, 1), vec!["S001"]);
        assert!(response.error.is_none());
    }

    #[rocket::async_test]
    async fn test_boolean_column_search_uses_keywords() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let inactive = get_grid(
            &client,
            &session,
            "/data/students?columns%5B6%5D%5Bsearch%5D%5Bvalue%5D=Inactive",
        )
        .await;
        assert_eq!(inactive.records_total, 3);
        assert_eq!(inactive.records_filtered, 1);
        assert_eq!(column(&inactive.data, 1), vec!["S003"]);

        let active = get_grid(
            &client,
            &session,
            "/data/students?columns%5B6%5D%5Bsearch%5D%5Bvalue%5D=active",
        )
        .await;
        assert_eq!(active.records_filtered, 2);
        assert!(!column(&active.data, 1).contains(&"S003"));
    }

    #[rocket::async_test]
    async fn test_out_of_range_order_column_uses_default_sort() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let response = get_grid(
            &client,
            &session,
            "/data/students?order%5B0%5D%5Bcolumn%5D=99&order%5B0%5D%5Bdir%5D=desc",
        )
        .await;

        // Default sort for students is last name ascending.
        assert_eq!(column(&response.data, 2), vec!["Hopper", "Lovelace", "Turing"]);
    }

    #[rocket::async_test]
    async fn test_students_sorted_by_student_id_descending() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let response = get_grid(
            &client,
            &session,
            "/data/students?draw=9&start=0&length=10&order%5B0%5D%5Bcolumn%5D=1&order%5B0%5D%5Bdir%5D=desc",
        )
        .await;

        assert_eq!(response.draw, 9);
        assert!(response.data.len() <= 10);
        assert_eq!(column(&response.data, 1), vec!["S003", "S002", "S001"]);
        assert!(response.data.iter().all(|row| row.len() == 8));
    }

    #[rocket::async_test]
    async fn test_paging_keeps_counts() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let response = get_grid(
            &client,
            &session,
            "/data/students?start=1&length=1&order%5B0%5D%5Bcolumn%5D=1",
        )
        .await;

        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 3);
        assert_eq!(column(&response.data, 1), vec!["S002"]);

        let everything = get_grid(&client, &session, "/data/students?length=-1").await;
        assert_eq!(everything.data.len(), 3);
    }

    #[rocket::async_test]
    async fn test_entity_filters_apply() {
        let test_db = create_standard_test_db().await;
        let (client, test_db) = setup_test_client(test_db).await;
        let session = login_as(&client, "viewer").await;

        let spring = test_db.id("term:SP26");
        let response = get_grid(&client, &session, &format!("/data/sections?term_fk={}", spring)).await;
        assert_eq!(response.records_total, 2);
        assert_eq!(response.records_filtered, 0);
        assert!(response.data.is_empty());

        let fall = test_db.id("term:FA25");
        let response = get_grid(&client, &session, &format!("/data/sections?term_fk={}", fall)).await;
        assert_eq!(response.records_filtered, 2);

        // Unparseable integer filters are ignored.
        let response = get_grid(&client, &session, "/data/sections?term_fk=abc").await;
        assert_eq!(response.records_filtered, 2);

        let response = get_grid(&client, &session, "/data/enrollments?status=ENROLLED").await;
        assert_eq!(response.records_filtered, 1);

        let response = get_grid(&client, &session, "/data/enrollments?status=dropped").await;
        assert_eq!(response.records_filtered, 0);
    }

    #[rocket::async_test]
    async fn test_search_wildcards_match_literally() {
        let (client, _) = setup_test_client(student_db().await).await;
        let session = login_as(&client, "viewer").await;

        let response = get_grid(&client, &session, "/data/students?search%5Bvalue%5D=%25").await;

        assert_eq!(response.records_total, 3);
        assert_eq!(response.records_filtered, 0);
    }

    #[rocket::async_test]
    async fn test_every_grid_answers() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;
        let session = login_as(&client, "admin").await;

        let grids = [
            ("institutions", 1),
            ("institutional-outcomes", 1),
            ("programs", 1),
            ("program-outcomes", 1),
            ("courses", 2),
            ("terms", 2),
            ("sections", 2),
            ("slos", 1),
            ("students", 1),
            ("enrollments", 1),
            ("assessments", 1),
            ("users", 3),
        ];

        for (grid, expected) in grids {
            let response = get_grid(&client, &session, &format!("/data/{}?draw=1", grid)).await;
            assert_eq!(response.records_total, expected, "unexpected total for {}", grid);
            assert_eq!(response.data.len() as i64, expected, "unexpected rows for {}", grid);
            assert!(response.error.is_none(), "grid {} reported an error", grid);
        }
    }

    #[rocket::async_test]
    async fn test_grid_requires_session() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client.get("/data/students").dispatch().await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value =
            serde_json::from_str(&response.into_string().await.expect("body")).expect("json");
        assert_eq!(body["error"], "Unauthorized");
    }

    #[rocket::async_test]
    async fn test_users_grid_requires_manage_users() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;
        let session = login_as(&client, "viewer").await;

        let response = client
            .get("/data/users?draw=4")
            .cookies(session.cookies.clone())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
        let body: Value =
            serde_json::from_str(&response.into_string().await.expect("body")).expect("json");
        assert_eq!(body["draw"], 4);
        assert!(body["error"].is_string());
    }
}
