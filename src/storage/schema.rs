//! Database schema constants.
//!
//! Each constant is a single SQL statement so it can be applied as one
//! migration step.

/// Subreddits being tracked.
pub const CREATE_SUBREDDITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS subreddits (
    id SERIAL PRIMARY KEY,
    name VARCHAR(50) NOT NULL UNIQUE,
    display_name VARCHAR(50),
    description TEXT,
    subscribers BIGINT,
    created_utc TIMESTAMPTZ,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    first_scraped_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_scraped_at TIMESTAMPTZ,
    total_scrapes INTEGER NOT NULL DEFAULT 0
)
"#;

/// One scrape of one subreddit.
pub const CREATE_SCRAPE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scrape_sessions (
    id UUID PRIMARY KEY,
    session_name VARCHAR(200),
    task_id VARCHAR(100),
    task_type VARCHAR(20) NOT NULL CHECK (task_type IN ('scheduled', 'manual')),
    config_id INTEGER,
    subreddit_id INTEGER NOT NULL REFERENCES subreddits(id),
    category VARCHAR(1) NOT NULL CHECK (category IN ('h', 'n', 't', 'r', 'c', 's')),
    n_results INTEGER,
    keywords VARCHAR(500),
    time_filter VARCHAR(10) CHECK (time_filter IN ('hour', 'day', 'week', 'month', 'year', 'all')),
    status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('success', 'failed', 'skipped', 'pending', 'running')),
    started_at TIMESTAMPTZ DEFAULT NOW(),
    completed_at TIMESTAMPTZ,
    duration_seconds INTEGER,
    submissions_found INTEGER NOT NULL DEFAULT 0,
    submissions_scraped INTEGER NOT NULL DEFAULT 0,
    comments_scraped INTEGER NOT NULL DEFAULT 0,
    total_content_items INTEGER NOT NULL DEFAULT 0,
    scrape_file_path VARCHAR(500),
    archive_path VARCHAR(500),
    r2_object_key VARCHAR(500),
    file_format VARCHAR(10) NOT NULL DEFAULT 'json',
    scrape_options JSONB,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0
)
"#;

/// Reddit submissions.
pub const CREATE_SUBMISSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS submissions (
    id UUID PRIMARY KEY,
    reddit_id VARCHAR(20) NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    permalink VARCHAR(500) NOT NULL,
    selftext TEXT,
    selftext_html TEXT,
    author VARCHAR(50),
    author_flair VARCHAR(200),
    created_utc TIMESTAMPTZ NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    upvote_ratio DOUBLE PRECISION,
    num_comments INTEGER NOT NULL DEFAULT 0,
    is_self BOOLEAN NOT NULL DEFAULT FALSE,
    is_original_content BOOLEAN NOT NULL DEFAULT FALSE,
    is_nsfw BOOLEAN NOT NULL DEFAULT FALSE,
    is_spoiler BOOLEAN NOT NULL DEFAULT FALSE,
    is_stickied BOOLEAN NOT NULL DEFAULT FALSE,
    is_locked BOOLEAN NOT NULL DEFAULT FALSE,
    distinguished VARCHAR(20),
    link_flair_text VARCHAR(200),
    link_flair_css_class VARCHAR(100),
    thumbnail VARCHAR(500),
    media_metadata JSONB,
    gallery_data JSONB,
    subreddit_id INTEGER NOT NULL REFERENCES subreddits(id),
    scrape_session_id UUID NOT NULL REFERENCES scrape_sessions(id),
    processing_status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (processing_status IN ('pending', 'processing', 'completed', 'failed', 'skipped')),
    processed_at TIMESTAMPTZ,
    processing_metadata JSONB,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_submission_reddit_id UNIQUE (reddit_id)
)
"#;

/// Reddit comments.
pub const CREATE_COMMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS comments (
    id UUID PRIMARY KEY,
    reddit_id VARCHAR(20) NOT NULL,
    body TEXT NOT NULL,
    body_html TEXT,
    author VARCHAR(50),
    author_flair VARCHAR(200),
    created_utc TIMESTAMPTZ NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    parent_id VARCHAR(20) NOT NULL,
    link_id VARCHAR(20) NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    is_submitter BOOLEAN NOT NULL DEFAULT FALSE,
    is_stickied BOOLEAN NOT NULL DEFAULT FALSE,
    distinguished VARCHAR(20),
    edited TIMESTAMPTZ,
    submission_id UUID NOT NULL REFERENCES submissions(id),
    subreddit_id INTEGER NOT NULL REFERENCES subreddits(id),
    processing_status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (processing_status IN ('pending', 'processing', 'completed', 'failed', 'skipped')),
    processed_at TIMESTAMPTZ,
    processing_metadata JSONB,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_comment_reddit_id UNIQUE (reddit_id)
)
"#;

/// Uploaded archives.
pub const CREATE_ARCHIVES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS archives (
    id UUID PRIMARY KEY,
    filename VARCHAR(500) NOT NULL,
    archive_type VARCHAR(50) NOT NULL,
    file_path VARCHAR(500),
    r2_object_key VARCHAR(500) UNIQUE,
    original_size_bytes BIGINT,
    compressed_size_bytes BIGINT,
    compression_ratio DOUBLE PRECISION,
    compression_level INTEGER,
    file_count INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    uploaded_at TIMESTAMPTZ,
    subreddits_included VARCHAR(500),
    date_range_start TIMESTAMPTZ,
    date_range_end TIMESTAMPTZ,
    total_submissions INTEGER NOT NULL DEFAULT 0,
    total_comments INTEGER NOT NULL DEFAULT 0,
    upload_metadata JSONB,
    is_uploaded BOOLEAN NOT NULL DEFAULT FALSE,
    is_deleted_locally BOOLEAN NOT NULL DEFAULT FALSE
)
"#;

/// Work items for downstream consumers.
pub const CREATE_PROCESSING_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processing_queue (
    id UUID PRIMARY KEY,
    content_type VARCHAR(20) NOT NULL CHECK (content_type IN ('submission', 'comment')),
    content_id UUID NOT NULL,
    reddit_id VARCHAR(20) NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    processing_status VARCHAR(20) NOT NULL DEFAULT 'pending'
        CHECK (processing_status IN ('pending', 'processing', 'completed', 'failed', 'skipped')),
    processor_name VARCHAR(100),
    queued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_processing_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    processing_result JSONB,
    error_message TEXT
)
"#;

/// Per-session measurements.
pub const CREATE_TASK_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS task_metrics (
    id UUID PRIMARY KEY,
    session_id UUID NOT NULL REFERENCES scrape_sessions(id),
    metric_name VARCHAR(100) NOT NULL,
    metric_value DOUBLE PRECISION NOT NULL,
    metric_unit VARCHAR(20),
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    task_metadata JSONB
)
"#;

/// Index statements, one per index.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_subreddit_active ON subreddits(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_scrape_session_status ON scrape_sessions(status)",
    "CREATE INDEX IF NOT EXISTS idx_scrape_session_started ON scrape_sessions(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_scrape_session_subreddit ON scrape_sessions(subreddit_id)",
    "CREATE INDEX IF NOT EXISTS idx_scrape_session_task_type ON scrape_sessions(task_type)",
    "CREATE INDEX IF NOT EXISTS idx_scrape_session_category ON scrape_sessions(category)",
    "CREATE INDEX IF NOT EXISTS idx_submission_created_utc ON submissions(created_utc)",
    "CREATE INDEX IF NOT EXISTS idx_submission_score ON submissions(score)",
    "CREATE INDEX IF NOT EXISTS idx_submission_subreddit ON submissions(subreddit_id)",
    "CREATE INDEX IF NOT EXISTS idx_submission_processing_status ON submissions(processing_status)",
    "CREATE INDEX IF NOT EXISTS idx_submission_author ON submissions(author)",
    "CREATE INDEX IF NOT EXISTS idx_comment_submission ON comments(submission_id)",
    "CREATE INDEX IF NOT EXISTS idx_comment_created_utc ON comments(created_utc)",
    "CREATE INDEX IF NOT EXISTS idx_comment_score ON comments(score)",
    "CREATE INDEX IF NOT EXISTS idx_comment_processing_status ON comments(processing_status)",
    "CREATE INDEX IF NOT EXISTS idx_comment_parent_id ON comments(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_comment_author ON comments(author)",
    "CREATE INDEX IF NOT EXISTS idx_archive_created_at ON archives(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_archive_type ON archives(archive_type)",
    "CREATE INDEX IF NOT EXISTS idx_archive_uploaded ON archives(is_uploaded)",
    "CREATE INDEX IF NOT EXISTS idx_processing_queue_status ON processing_queue(processing_status)",
    "CREATE INDEX IF NOT EXISTS idx_processing_queue_priority ON processing_queue(priority)",
    "CREATE INDEX IF NOT EXISTS idx_processing_queue_queued_at ON processing_queue(queued_at)",
    "CREATE INDEX IF NOT EXISTS idx_processing_queue_content ON processing_queue(content_type, content_id)",
    "CREATE INDEX IF NOT EXISTS idx_processing_queue_reddit_id ON processing_queue(reddit_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_metrics_session ON task_metrics(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_metrics_name ON task_metrics(metric_name)",
    "CREATE INDEX IF NOT EXISTS idx_task_metrics_recorded ON task_metrics(recorded_at)",
];

/// Tables in creation order. Dropping must go in reverse.
pub const TABLES: [&str; 7] = [
    "subreddits",
    "scrape_sessions",
    "submissions",
    "comments",
    "archives",
    "processing_queue",
    "task_metrics",
];

/// Returns all schema statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_SUBREDDITS_TABLE,
        CREATE_SCRAPE_SESSIONS_TABLE,
        CREATE_SUBMISSIONS_TABLE,
        CREATE_COMMENTS_TABLE,
        CREATE_ARCHIVES_TABLE,
        CREATE_PROCESSING_QUEUE_TABLE,
        CREATE_TASK_METRICS_TABLE,
    ];
    statements.extend_from_slice(CREATE_INDEXES);
    statements
}
