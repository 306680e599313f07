/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

//! Outbound messages and their per-sequence ordering.

pub(crate) mod manager;

pub(crate) use manager::MessageTier;
