use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::jwt::{JwtCodec, TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH};
use crate::auth::password;
use crate::db::{DbConnection, DbPool};
use crate::error::{AuthError, AuthResult};
use crate::models::{NewRefreshSession, NewUser, RefreshSession, User, ROLE_ADMIN, ROLE_USER};
use crate::schema::{refresh_sessions, users};

/// An access/refresh pair as handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// The identity resolved from a verified access token.
#[derive(Debug, Clone, Serialize)]
pub struct AccessClaims {
    pub user_id: String,
    pub email: Option<String>,
    pub role: String,
}

/// Issuance, rotation, and revocation of token pairs, plus the user
/// lifecycle they hang off. Access tokens are stateless; refresh tokens are
/// backed by a `refresh_sessions` row so they can be revoked.
pub struct SessionManager {
    pool: DbPool,
    codec: JwtCodec,
}

impl SessionManager {
    pub fn new(pool: DbPool, codec: JwtCodec) -> Self {
        Self { pool, codec }
    }

    fn conn(&self) -> AuthResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    pub fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
        role: &str,
    ) -> AuthResult<User> {
        let email = email.trim();
        let mut conn = self.conn()?;

        if find_user_by_email(&mut conn, email)?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = password::hash_password(password)
            .map_err(|err| AuthError::Credential(err.to_string()))?;
        let role = if role == ROLE_ADMIN { ROLE_ADMIN } else { ROLE_USER };
        let now = Utc::now().naive_utc();
        let new_user = NewUser {
            user_id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            password_hash: Some(password_hash),
            full_name: full_name.map(str::to_string),
            role: role.to_string(),
            is_active: true,
            created_at: now,
            last_seen_at: now,
        };

        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut conn)?;

        info!(user_id = %new_user.user_id, "registered user");
        let user = users::table.find(&new_user.user_id).first(&mut conn)?;
        Ok(user)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> AuthResult<User> {
        let mut conn = self.conn()?;

        let user =
            find_user_by_email(&mut conn, email.trim())?.ok_or(AuthError::InvalidCredentials)?;
        if !user.is_active {
            return Err(AuthError::InactiveUser);
        }

        let password_hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        let valid = password::verify_password(password, password_hash)
            .map_err(|err| AuthError::Credential(err.to_string()))?;
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }

        touch_last_seen(&mut conn, &user.user_id)?;
        let user = users::table.find(&user.user_id).first(&mut conn)?;
        Ok(user)
    }

    /// Two independently signed claim sets. The refresh half is persisted as
    /// a session keyed by its jti; the access half is verified statelessly.
    pub fn issue_pair(&self, user: &User) -> AuthResult<TokenPair> {
        let mut conn = self.conn()?;
        let (pair, _) = self.issue_pair_with_conn(&mut conn, user)?;
        Ok(pair)
    }

    fn issue_pair_with_conn(
        &self,
        conn: &mut DbConnection,
        user: &User,
    ) -> AuthResult<(TokenPair, String)> {
        let access = self.codec.issue_access(user)?;
        let refresh = self.codec.issue_refresh(user)?;

        let session = NewRefreshSession {
            jti: refresh.jti.clone(),
            user_id: user.user_id.clone(),
            expires_at: refresh.expires_at.naive_utc(),
            created_at: Utc::now().naive_utc(),
        };
        diesel::insert_into(refresh_sessions::table)
            .values(&session)
            .execute(conn)?;

        debug!(user_id = %user.user_id, jti = %refresh.jti, "issued token pair");
        Ok((
            TokenPair {
                access_token: access.token,
                refresh_token: refresh.token,
                token_type: "bearer".to_string(),
                expires_in: self.codec.access_ttl_seconds(),
            },
            refresh.jti,
        ))
    }

    /// Stateless verification: signature, expiry, audience/issuer, token
    /// type, then a live-subject check. Never writes to the store.
    pub fn verify_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let claims = self.codec.decode_expected(token, TOKEN_TYPE_ACCESS)?;

        let mut conn = self.conn()?;
        let user: Option<User> = users::table
            .find(&claims.sub)
            .first(&mut conn)
            .optional()?;
        match user {
            Some(user) if user.is_active => Ok(AccessClaims {
                user_id: user.user_id,
                email: user.email,
                role: user.role,
            }),
            _ => Err(AuthError::InactiveUser),
        }
    }

    /// Redeem a refresh token for a new pair. Issue-then-revoke: a crash
    /// between the two writes can transiently leave two live sessions on a
    /// chain, never zero.
    pub fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.codec.decode_expected(refresh_token, TOKEN_TYPE_REFRESH)?;
        let mut conn = self.conn()?;

        let session: RefreshSession = refresh_sessions::table
            .find(&claims.jti)
            .first(&mut conn)
            .optional()?
            .ok_or(AuthError::SessionNotFound)?;
        if session.revoked_at.is_some() {
            return Err(AuthError::SessionRevoked);
        }
        if session.expires_at <= Utc::now().naive_utc() {
            return Err(AuthError::SessionExpired);
        }

        let user: Option<User> = users::table
            .find(&session.user_id)
            .first(&mut conn)
            .optional()?;
        let user = match user {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::InactiveUser),
        };

        touch_last_seen(&mut conn, &user.user_id)?;
        let (pair, new_jti) = self.issue_pair_with_conn(&mut conn, &user)?;

        let now = Utc::now().naive_utc();
        diesel::update(refresh_sessions::table.find(&claims.jti))
            .set((
                refresh_sessions::revoked_at.eq(Some(now)),
                refresh_sessions::replaced_by_jti.eq(Some(new_jti.as_str())),
            ))
            .execute(&mut conn)?;

        info!(user_id = %user.user_id, old_jti = %claims.jti, new_jti = %new_jti, "rotated refresh session");
        Ok(pair)
    }

    /// Mark the session revoked if not already. Idempotent; revoking an
    /// unknown jti is a no-op.
    pub fn revoke(&self, refresh_token: &str) -> AuthResult<()> {
        let claims = self.codec.decode_expected(refresh_token, TOKEN_TYPE_REFRESH)?;
        let mut conn = self.conn()?;

        let now = Utc::now().naive_utc();
        diesel::update(
            refresh_sessions::table
                .find(&claims.jti)
                .filter(refresh_sessions::revoked_at.is_null()),
        )
        .set(refresh_sessions::revoked_at.eq(Some(now)))
        .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> AuthResult<Option<User>> {
        let mut conn = self.conn()?;
        Ok(users::table.find(user_id).first(&mut conn).optional()?)
    }

    /// Provision-on-first-contact: update the email and last-seen stamp of an
    /// existing row, or insert a bare active user.
    pub fn ensure_user(&self, user_id: &str, email: Option<&str>) -> AuthResult<User> {
        let mut conn = self.conn()?;
        let now = Utc::now().naive_utc();

        let existing: Option<User> = users::table.find(user_id).first(&mut conn).optional()?;
        match existing {
            Some(user) => {
                let next_email = email.map(str::to_string).or(user.email);
                diesel::update(users::table.find(user_id))
                    .set((
                        users::email.eq(next_email),
                        users::last_seen_at.eq(now),
                    ))
                    .execute(&mut conn)?;
            }
            None => {
                let new_user = NewUser {
                    user_id: user_id.to_string(),
                    email: email.map(str::to_string),
                    password_hash: None,
                    full_name: None,
                    role: ROLE_USER.to_string(),
                    is_active: true,
                    created_at: now,
                    last_seen_at: now,
                };
                diesel::insert_into(users::table)
                    .values(&new_user)
                    .execute(&mut conn)?;
            }
        }

        let user = users::table.find(user_id).first(&mut conn)?;
        Ok(user)
    }

    pub fn list_users(&self, limit: i64) -> AuthResult<Vec<User>> {
        let mut conn = self.conn()?;
        Ok(users::table
            .order(users::created_at.desc())
            .limit(limit)
            .load(&mut conn)?)
    }

    pub fn require_admin(claims: &AccessClaims) -> AuthResult<()> {
        if claims.role == ROLE_ADMIN {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

fn find_user_by_email(conn: &mut DbConnection, email: &str) -> AuthResult<Option<User>> {
    // The email column carries COLLATE NOCASE, so this match is
    // case-insensitive.
    Ok(users::table
        .filter(users::email.eq(email))
        .first(conn)
        .optional()?)
}

fn touch_last_seen(conn: &mut DbConnection, user_id: &str) -> AuthResult<()> {
    diesel::update(users::table.find(user_id))
        .set(users::last_seen_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}
