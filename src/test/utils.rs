#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::error::AppError;
    use crate::telemetry::init_test_tracing;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;

    pub static STANDARD_PASSWORD: &str = "password123";

    /// Low bcrypt cost keeps fixture setup fast; verification is cost-agnostic.
    const TEST_BCRYPT_COST: u32 = 4;

    pub struct TestUser {
        pub username: String,
        pub role: Role,
        pub password: String,
        pub is_active: bool,
    }

    pub struct TestStudent {
        pub student_id: String,
        pub first_name: String,
        pub last_name: String,
        pub is_active: bool,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        students: Vec<TestStudent>,
        catalog: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, username: &str, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role,
                password: STANDARD_PASSWORD.to_string(),
                is_active: true,
            });
            self
        }

        pub fn admin(self, username: &str) -> Self {
            self.user(username, Role::Admin)
        }

        pub fn coordinator(self, username: &str) -> Self {
            self.user(username, Role::Coordinator)
        }

        pub fn viewer(self, username: &str) -> Self {
            self.user(username, Role::Viewer)
        }

        pub fn inactive_user(mut self, username: &str, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role,
                password: STANDARD_PASSWORD.to_string(),
                is_active: false,
            });
            self
        }

        pub fn student(mut self, student_id: &str, first_name: &str, last_name: &str) -> Self {
            self.students.push(TestStudent {
                student_id: student_id.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                is_active: true,
            });
            self
        }

        pub fn inactive_student(
            mut self,
            student_id: &str,
            first_name: &str,
            last_name: &str,
        ) -> Self {
            self.students.push(TestStudent {
                student_id: student_id.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                is_active: false,
            });
            self
        }

        /// One institution, program, two courses, two terms, two sections, an
        /// outcome chain, and an enrolled and assessed student `S001`.
        pub fn catalog(mut self) -> Self {
            self.catalog = true;
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_test_tracing();

            // A single connection, otherwise every pooled connection would
            // open its own empty in-memory database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut ids: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let hashed = bcrypt::hash(&user.password, TEST_BCRYPT_COST)?;
                let id = insert(
                    &pool,
                    sqlx::query(
                        "INSERT INTO users (username, email, password, display_name, role, is_active)
                         VALUES (?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&user.username)
                    .bind(format!("{}@example.edu", user.username))
                    .bind(hashed)
                    .bind(&user.username)
                    .bind(user.role.as_str())
                    .bind(user.is_active),
                )
                .await?;
                ids.insert(format!("user:{}", user.username), id);
            }

            if self.catalog {
                seed_catalog(&pool, &mut ids).await?;
            }

            for student in &self.students {
                let id = insert(
                    &pool,
                    sqlx::query(
                        "INSERT INTO students (student_id, first_name, last_name, is_active)
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(&student.student_id)
                    .bind(&student.first_name)
                    .bind(&student.last_name)
                    .bind(student.is_active),
                )
                .await?;
                ids.insert(format!("student:{}", student.student_id), id);
            }

            Ok(TestDb { pool, ids })
        }
    }

    async fn insert<'q>(
        pool: &Pool<Sqlite>,
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> Result<i64, AppError> {
        Ok(query.execute(pool).await?.last_insert_rowid())
    }

    async fn seed_catalog(
        pool: &Pool<Sqlite>,
        ids: &mut HashMap<String, i64>,
    ) -> Result<(), AppError> {
        let institution = insert(
            pool,
            sqlx::query(
                "INSERT INTO institutions (institution_code, institution_name) VALUES ('UNI', 'State University')",
            ),
        )
        .await?;
        ids.insert("institution:UNI".to_string(), institution);

        let outcome = insert(
            pool,
            sqlx::query(
                "INSERT INTO institutional_outcomes (institution_fk, code, description)
                 VALUES (?, 'IO1', 'Critical thinking')",
            )
            .bind(institution),
        )
        .await?;
        ids.insert("institutional_outcome:IO1".to_string(), outcome);

        let program = insert(
            pool,
            sqlx::query(
                "INSERT INTO programs (institution_fk, program_code, program_name)
                 VALUES (?, 'CS', 'Computer Science')",
            )
            .bind(institution),
        )
        .await?;
        ids.insert("program:CS".to_string(), program);

        let program_outcome = insert(
            pool,
            sqlx::query(
                "INSERT INTO program_outcomes (program_fk, institutional_outcome_fk, code, description)
                 VALUES (?, ?, 'PO1', 'Design software')",
            )
            .bind(program)
            .bind(outcome),
        )
        .await?;
        ids.insert("program_outcome:PO1".to_string(), program_outcome);

        for (code, title) in [("CS101", "Intro to Programming"), ("CS201", "Data Structures")] {
            let course = insert(
                pool,
                sqlx::query(
                    "INSERT INTO courses (program_fk, course_code, course_title) VALUES (?, ?, ?)",
                )
                .bind(program)
                .bind(code)
                .bind(title),
            )
            .await?;
            ids.insert(format!("course:{code}"), course);
        }

        for (code, name, start, end) in [
            ("FA25", "Fall 2025", "2025-08-25", "2025-12-15"),
            ("SP26", "Spring 2026", "2026-01-12", "2026-05-08"),
        ] {
            let term = insert(
                pool,
                sqlx::query(
                    "INSERT INTO terms (term_code, term_name, start_date, end_date) VALUES (?, ?, ?, ?)",
                )
                .bind(code)
                .bind(name)
                .bind(start)
                .bind(end),
            )
            .await?;
            ids.insert(format!("term:{code}"), term);
        }

        for (course, capacity) in [("CS101", 30), ("CS201", 1)] {
            let section = insert(
                pool,
                sqlx::query(
                    "INSERT INTO course_sections (course_fk, term_fk, section_number, instructor_name, max_enrollment)
                     VALUES (?, ?, '01', 'Dr. Knuth', ?)",
                )
                .bind(ids[&format!("course:{course}")])
                .bind(ids["term:FA25"])
                .bind(capacity),
            )
            .await?;
            ids.insert(format!("section:{course}-01"), section);
        }

        let slo = insert(
            pool,
            sqlx::query(
                "INSERT INTO student_learning_outcomes (course_fk, program_outcome_fk, slo_code, description)
                 VALUES (?, ?, 'SLO1', 'Write small programs')",
            )
            .bind(ids["course:CS101"])
            .bind(program_outcome),
        )
        .await?;
        ids.insert("slo:SLO1".to_string(), slo);

        let student = insert(
            pool,
            sqlx::query(
                "INSERT INTO students (student_id, first_name, last_name, email)
                 VALUES ('S001', 'Ada', 'Lovelace', 'ada@example.edu')",
            ),
        )
        .await?;
        ids.insert("student:S001".to_string(), student);

        let enrollment = insert(
            pool,
            sqlx::query(
                "INSERT INTO enrollments (student_fk, course_section_fk, enrollment_date)
                 VALUES (?, ?, '2025-08-20')",
            )
            .bind(student)
            .bind(ids["section:CS101-01"]),
        )
        .await?;
        ids.insert("enrollment:S001-CS101".to_string(), enrollment);

        let assessment = insert(
            pool,
            sqlx::query(
                "INSERT INTO assessments (enrollment_fk, student_learning_outcome_fk, score_value, achievement_level)
                 VALUES (?, ?, 91.5, 'met')",
            )
            .bind(enrollment)
            .bind(slo),
        )
        .await?;
        ids.insert("assessment:S001-SLO1".to_string(), assessment);

        Ok(())
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub ids: HashMap<String, i64>,
    }

    impl TestDb {
        /// Id of a seeded row, keyed like `student:S001` or `user:admin`.
        pub fn id(&self, key: &str) -> i64 {
            match self.ids.get(key) {
                Some(id) => *id,
                None => panic!("No seeded row for {key}"),
            }
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .expect("count query failed")
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::api::LoginResponse;
    use crate::config::AppConfig;
    use crate::grid::GridResponse;
    use crate::init_rocket;
    use rocket::figment::Figment;
    use rocket::http::{ContentType, Cookie};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::json;

    pub struct TestSession {
        pub cookies: Vec<Cookie<'static>>,
        pub csrf_token: String,
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin")
            .coordinator("coordinator")
            .viewer("viewer")
            .catalog()
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with(test_db, AppConfig::figment()).await
    }

    pub async fn setup_test_client_with(test_db: TestDb, figment: Figment) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), figment);
        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> TestSession {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "password": password }).to_string())
            .dispatch()
            .await;

        let cookies: Vec<Cookie<'static>> = response
            .cookies()
            .iter()
            .map(|cookie| cookie.clone().into_owned())
            .collect();

        let body = response.into_string().await.expect("login body");
        let login: LoginResponse = serde_json::from_str(&body).expect("login response json");
        let user = login.user.expect("login should succeed");

        TestSession {
            cookies,
            csrf_token: user.csrf_token,
        }
    }

    pub async fn login_as(client: &Client, username: &str) -> TestSession {
        login_test_user(client, username, STANDARD_PASSWORD).await
    }

    /// Posts an admin form as `session`, filling in the CSRF token.
    pub async fn post_form<'c>(
        client: &'c Client,
        session: &TestSession,
        path: &str,
        fields: &[(&str, &str)],
    ) -> LocalResponse<'c> {
        let mut body = vec![format!("csrf_token={}", encode(&session.csrf_token))];
        body.extend(
            fields
                .iter()
                .map(|(key, value)| format!("{}={}", key, encode(value))),
        );

        client
            .post(path.to_string())
            .header(ContentType::Form)
            .cookies(session.cookies.clone())
            .body(body.join("&"))
            .dispatch()
            .await
    }

    const BOUNDARY: &str = "X-RECORDS-CONSOLE-BOUNDARY";

    /// Posts `multipart/form-data` the way a browser file input does:
    /// the CSRF token and `fields` as text parts, then `file` as
    /// `(field name, file name, contents)`.
    pub async fn post_multipart<'c>(
        client: &'c Client,
        session: &TestSession,
        path: &str,
        fields: &[(&str, &str)],
        file: (&str, &str, &str),
    ) -> LocalResponse<'c> {
        let mut body = String::new();
        let text_parts = std::iter::once(("csrf_token", session.csrf_token.as_str()))
            .chain(fields.iter().copied());
        for (name, value) in text_parts {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }

        let (name, file_name, contents) = file;
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/csv\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
        ));

        client
            .post(path.to_string())
            .header(ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY)))
            .cookies(session.cookies.clone())
            .body(body)
            .dispatch()
            .await
    }

    pub async fn get_grid(client: &Client, session: &TestSession, uri: &str) -> GridResponse {
        let response = client
            .get(uri.to_string())
            .cookies(session.cookies.clone())
            .dispatch()
            .await;
        let body = response.into_string().await.expect("grid body");
        serde_json::from_str(&body).expect("grid response json")
    }

    /// Percent-encodes everything outside the unreserved set.
    pub fn encode(value: &str) -> String {
        value
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{:02X}", b),
            })
            .collect()
    }
}
