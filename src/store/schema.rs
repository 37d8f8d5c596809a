pub const SCHEMA: &str = r#"
-- Users mirrored from the upstream source; rows without external_id are local
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    display_name TEXT,
    mail TEXT,
    status TEXT,
    liferay_sn TEXT,
    external_id INTEGER UNIQUE
);

-- Groups form a tree through parent_group_id
CREATE TABLE IF NOT EXISTS idm_group (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    external_id INTEGER UNIQUE,
    parent_group_id INTEGER REFERENCES idm_group(id)
);

-- Login names a user can authenticate with
CREATE TABLE IF NOT EXISTS user_identity (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    login TEXT NOT NULL UNIQUE
);

-- Many-to-many relationship between users and groups
CREATE TABLE IF NOT EXISTS user_idm_group (
    user_id INTEGER NOT NULL REFERENCES users(id),
    idm_group_id INTEGER NOT NULL REFERENCES idm_group(id),
    PRIMARY KEY (user_id, idm_group_id)
);

CREATE INDEX IF NOT EXISTS idx_idm_group_parent ON idm_group(parent_group_id);
CREATE INDEX IF NOT EXISTS idx_user_identity_user ON user_identity(user_id);
CREATE INDEX IF NOT EXISTS idx_user_idm_group_group ON user_idm_group(idm_group_id);
"#;
