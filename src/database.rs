use crate::error::{Error, Result};
use crate::model::*;
use sled::transaction::{
    abort, ConflictableTransactionError, TransactionError, TransactionResult, Transactional,
};

// Big-endian so that tree iteration follows id (creation) order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64> {
    let bytes = id
        .as_ref()
        .try_into()
        .map_err(|_| sled::Error::Unsupported("malformed user id".to_owned()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_user<V: AsRef<[u8]>>(data: V) -> Result<User> {
    Ok(bincode::deserialize(data.as_ref())?)
}

pub trait UserDb {
    /// Returns `None` if the username is taken.
    fn add_user(&self, user: &User, credential: &str) -> Result<Option<u64>>;
    fn get_user(&self, id: u64) -> Result<Option<User>>;
    fn get_user_id(&self, username: &str) -> Result<Option<u64>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<(u64, User)>>;
    fn get_credential(&self, id: u64) -> Result<Option<String>>;
    /// Applies `f` to the stored user atomically; `None` if the user is gone.
    fn update_user<F, T>(&self, id: u64, f: F) -> Result<Option<T>>
    where
        F: Fn(&mut User) -> T;
    fn remove_user(&self, username: &str) -> Result<bool>;
    fn users(&self) -> Result<Vec<(u64, User)>>;
}

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"users_username";
const CREDENTIALS: &[u8] = b"credentials";

impl UserDb for sled::Db {
    fn add_user(&self, user: &User, credential: &str) -> Result<Option<u64>> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let credentials = self.open_tree(CREDENTIALS)?;
        let id = self.generate_id()?;
        let data = bincode::serialize(user)?;
        let result = (&users, &users_username, &credentials).transaction(
            |(users, users_username, credentials)| {
                if users_username
                    .insert(user.username.as_bytes(), &serialize_id(id))?
                    .is_some()
                {
                    return abort(());
                }
                users.insert(&serialize_id(id), data.clone())?;
                credentials.insert(&serialize_id(id), credential.as_bytes())?;
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(Some(id)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    fn get_user(&self, id: u64) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        users.get(serialize_id(id))?.map(decode_user).transpose()
    }

    fn get_user_id(&self, username: &str) -> Result<Option<u64>> {
        let users_username = self.open_tree(USERS_USERNAME)?;
        users_username
            .get(username)?
            .map(deserialize_id)
            .transpose()
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<(u64, User)>> {
        if let Some(id) = self.get_user_id(username)? {
            let user = self
                .get_user(id)?
                .ok_or_else(|| sled::Error::ReportableBug("Bad index users_username".to_owned()))?;
            Ok(Some((id, user)))
        } else {
            Ok(None)
        }
    }

    fn get_credential(&self, id: u64) -> Result<Option<String>> {
        let credentials = self.open_tree(CREDENTIALS)?;
        Ok(credentials
            .get(serialize_id(id))?
            .map(|data| String::from_utf8_lossy(&data).into_owned()))
    }

    fn update_user<F, T>(&self, id: u64, f: F) -> Result<Option<T>>
    where
        F: Fn(&mut User) -> T,
    {
        let users = self.open_tree(USERS)?;
        let key = serialize_id(id);
        let result = users.transaction(|users| {
            let mut user = match users.get(&key)? {
                Some(data) => decode_user(&data).map_err(ConflictableTransactionError::Abort)?,
                None => return Ok(None),
            };
            let out = f(&mut user);
            let data = bincode::serialize(&user)
                .map_err(|err| ConflictableTransactionError::Abort(Error::from(err)))?;
            users.insert(&key, data)?;
            Ok(Some(out))
        });
        Ok(result?)
    }

    fn remove_user(&self, username: &str) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let credentials = self.open_tree(CREDENTIALS)?;
        let result: TransactionResult<bool, Error> = (&users, &users_username, &credentials)
            .transaction(|(users, users_username, credentials)| {
                let id = match users_username.remove(username.as_bytes())? {
                    Some(id) => id,
                    None => return Ok(false),
                };
                users.remove(&id)?;
                credentials.remove(&id)?;
                Ok(true)
            });
        Ok(result?)
    }

    fn users(&self) -> Result<Vec<(u64, User)>> {
        let users = self.open_tree(USERS)?;
        users
            .iter()
            .map(|entry| {
                let (id, data) = entry?;
                Ok((deserialize_id(id)?, decode_user(data)?))
            })
            .collect()
    }
}
