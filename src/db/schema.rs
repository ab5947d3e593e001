diesel::table! {
    pairings (id) {
        id -> Text,
        mentor_uid -> Text,
        student_uid -> Text,
        status -> Text,
        mentor_handle -> Nullable<Text>,
        student_handle -> Nullable<Text>,
        mentor_kind -> Nullable<Text>,
        request_message -> Nullable<Text>,
        decline_reason -> Nullable<Text>,
        requested_at -> Timestamptz,
        responded_at -> Nullable<Timestamptz>,
        ended_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    mentor_directory (mentor_uid) {
        mentor_uid -> Text,
        display_name -> Nullable<Text>,
        mentor_kind -> Nullable<Text>,
        active -> Bool,
        capacity -> Integer,
        active_students -> Integer,
        available_slots -> Integer,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(pairings, mentor_directory);
