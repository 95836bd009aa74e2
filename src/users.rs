//! Module implement the credential store for authenticated ingress.
//!
//! A flat qpack file of `(name, password-hash, access_bit)` records with
//! schema 1. Passwords are stored as salted argon2 strings and verified in
//! constant time. A database without a users file bootstraps the default
//! `iris`/`siri` account with the full access profile.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};

use std::{convert::TryFrom, ffi, path};

use crate::{files, qpack, Error, Result};

pub const USERS_FN: &str = "users.dat";

const USERS_SCHEMA: i16 = 1;
const MIN_USER_LEN: usize = 2;
const MAX_USER_LEN: usize = 60;
const MIN_PASSWORD_LEN: usize = 2;
const MAX_PASSWORD_LEN: usize = 128;

pub const ACCESS_SELECT: u32 = 1 << 0;
pub const ACCESS_INSERT: u32 = 1 << 1;
pub const ACCESS_CREATE: u32 = 1 << 2;
pub const ACCESS_DROP: u32 = 1 << 3;
pub const ACCESS_ALTER: u32 = 1 << 4;
pub const ACCESS_GRANT: u32 = 1 << 5;

/// Everything, the bootstrap account's profile.
pub const ACCESS_PROFILE_FULL: u32 = ACCESS_SELECT
    | ACCESS_INSERT
    | ACCESS_CREATE
    | ACCESS_DROP
    | ACCESS_ALTER
    | ACCESS_GRANT;

pub struct User {
    pub name: String,
    // salted argon2 hash in PHC string form.
    password: String,
    pub access_bit: u32,
}

impl User {
    pub fn new(name: &str, password: &str, access_bit: u32) -> Result<User> {
        let val = User {
            name: name.to_string(),
            password: hash_password(password)?,
            access_bit,
        };
        Ok(val)
    }

    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.password = hash_password(password)?;
        Ok(())
    }

    pub fn has_access(&self, access: u32) -> bool {
        (self.access_bit & access) == access
    }
}

fn hash_password(password: &str) -> Result<String> {
    if password.len() < MIN_PASSWORD_LEN || password.len() > MAX_PASSWORD_LEN {
        err_at!(
            InvalidInput, msg: "password should be {} to {} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )?;
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = err_at!(
        InvalidInput,
        Argon2::default().hash_password(password.as_bytes(), &salt)
    )?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// The credential store, a handful of records, kept as a flat list.
pub struct Users {
    loc: ffi::OsString,
    users: Vec<User>,
}

impl Users {
    /// Load `users.dat` from the database directory, bootstrapping the
    /// default account when the file does not exist yet. Unknown schema
    /// aborts the load, nothing is exposed.
    pub fn load(dir: &ffi::OsStr) -> Result<Users> {
        let loc = {
            let loc: path::PathBuf =
                [dir, AsRef::<ffi::OsStr>::as_ref(USERS_FN)].iter().collect();
            loc.into_os_string()
        };

        let mut val = Users { loc, users: vec![] };

        if !files::file_exists(&val.loc) {
            let user = User::new("iris", "siri", ACCESS_PROFILE_FULL)?;
            val.users.push(user);
            val.save()?;
            return Ok(val);
        }

        let data = files::load_file(&val.loc)?;
        let mut up = qpack::Unpacker::new(&data);
        qpack::check_schema(&mut up, USERS_SCHEMA, "users.dat")?;

        loop {
            match up.next()? {
                qpack::Obj::Array(3) => (),
                qpack::Obj::End => break,
                obj => err_at!(DecodeFail, msg: "users.dat bad record {:?}", obj)?,
            }
            let name = err_at!(
                FailConvert,
                String::from_utf8(up.next()?.as_raw()?.to_vec())
            )?;
            let password = err_at!(
                FailConvert,
                String::from_utf8(up.next()?.as_raw()?.to_vec())
            )?;
            let access_bit =
                err_at!(FailConvert, u32::try_from(up.next()?.to_int()?))?;
            val.users.push(User {
                name,
                password,
                access_bit,
            });
        }

        Ok(val)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Add a user after validating name rules, name length within bounds,
    /// graphical characters only, no duplicates, then persist.
    pub fn add_user(&mut self, user: User) -> Result<()> {
        if user.name.len() < MIN_USER_LEN {
            err_at!(
                InvalidInput, msg: "user name should be at least {} characters",
                MIN_USER_LEN
            )?;
        }
        if user.name.len() > MAX_USER_LEN {
            err_at!(
                InvalidInput, msg: "user name should be at most {} characters",
                MAX_USER_LEN
            )?;
        }
        if !user.name.chars().all(|ch| ch.is_ascii_graphic()) {
            err_at!(
                InvalidInput, msg: "user name contains illegal characters, only \
                graphical characters are allowed, no spaces, tabs etc."
            )?;
        }
        if self.users.iter().any(|u| u.name == user.name) {
            err_at!(InvalidInput, msg: "user name {:?} already exists", user.name)?;
        }

        self.users.push(user);
        self.save()
    }

    /// Fetch by name. With a password supplied the stored hash must match,
    /// otherwise the lookup alone decides.
    pub fn get_user(&self, name: &str, password: Option<&str>) -> Option<&User> {
        let user = self.users.iter().find(|u| u.name == name)?;
        match password {
            None => Some(user),
            Some(password) if verify_password(password, &user.password) => Some(user),
            Some(_) => None,
        }
    }

    pub fn drop_user(&mut self, name: &str) -> Result<()> {
        match self.users.iter().position(|u| u.name == name) {
            Some(off) => {
                self.users.remove(off);
                self.save()
            }
            None => err_at!(KeyNotFound, msg: "user {:?} does not exist", name),
        }
    }

    /// Raw file bytes, what a joining replica receives to bootstrap its
    /// own credential store.
    pub fn get_file(&self) -> Result<Vec<u8>> {
        files::load_file(&self.loc)
    }

    fn save(&self) -> Result<()> {
        let mut fpacker = qpack::FilePacker::create(&self.loc)?;
        fpacker.open_array()?;
        fpacker.add_int16(USERS_SCHEMA)?;
        for user in self.users.iter() {
            fpacker.add_array(3)?;
            fpacker.add_str(&user.name)?;
            fpacker.add_raw(user.password.as_bytes())?;
            fpacker.add_int32(user.access_bit as i32)?;
        }
        fpacker.close()
    }
}

#[cfg(test)]
#[path = "users_test.rs"]
mod users_test;
